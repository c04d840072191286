//! Frame type and pixel-format conversion to RGB8.

use image::RgbImage;

/// A captured camera frame, converted to RGB.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// The `height` rows of a driver buffer, each `row_bytes` long.
///
/// `stride` is the driver's bytes-per-line; anything smaller than
/// `row_bytes` (including 0) means tightly packed rows.
fn rows<'a>(
    format: &'static str,
    buf: &'a [u8],
    row_bytes: usize,
    stride: usize,
    height: u32,
) -> Result<impl Iterator<Item = &'a [u8]> + 'a, FrameError> {
    let stride = stride.max(row_bytes);
    let height = height as usize;
    let expected = match height {
        0 => 0,
        h => stride * (h - 1) + row_bytes,
    };
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok((0..height).map(move |y| &buf[y * stride..y * stride + row_bytes]))
}

fn build(width: u32, height: u32, rgb: Vec<u8>) -> RgbImage {
    // Callers size `rgb` to exactly width * height * 3.
    RgbImage::from_raw(width, height, rgb).unwrap_or_else(|| RgbImage::new(width, height))
}

/// Packed RGB24. Row padding and trailing bytes are dropped.
pub fn rgb3_to_rgb(
    buf: &[u8],
    width: u32,
    height: u32,
    stride: usize,
) -> Result<RgbImage, FrameError> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for row in rows("RGB3", buf, width as usize * 3, stride, height)? {
        rgb.extend_from_slice(row);
    }
    Ok(build(width, height, rgb))
}

/// Convert packed YUYV (4:2:2) to RGB with BT.601 full-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(
    buf: &[u8],
    width: u32,
    height: u32,
    stride: usize,
) -> Result<RgbImage, FrameError> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for row in rows("YUYV", buf, width as usize * 2, stride, height)? {
        for chunk in row.chunks_exact(4) {
            let u = chunk[1] as f32 - 128.0;
            let v = chunk[3] as f32 - 128.0;
            for y in [chunk[0] as f32, chunk[2] as f32] {
                rgb.push(saturate(y + 1.402 * v));
                rgb.push(saturate(y - 0.344_136 * u - 0.714_136 * v));
                rgb.push(saturate(y + 1.772 * u));
            }
        }
    }
    Ok(build(width, height, rgb))
}

/// 8-bit grayscale replicated into all three channels.
pub fn grey_to_rgb(
    buf: &[u8],
    width: u32,
    height: u32,
    stride: usize,
) -> Result<RgbImage, FrameError> {
    let rgb = rows("GREY", buf, width as usize, stride, height)?
        .flatten()
        .flat_map(|&g| [g, g, g])
        .collect();
    Ok(build(width, height, rgb))
}

/// 16-bit little-endian grayscale, keeping the high byte.
pub fn y16_to_rgb(
    buf: &[u8],
    width: u32,
    height: u32,
    stride: usize,
) -> Result<RgbImage, FrameError> {
    let rgb = rows("Y16", buf, width as usize * 2, stride, height)?
        .flat_map(|row| row.chunks_exact(2))
        .flat_map(|px| {
            let g = (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8;
            [g, g, g]
        })
        .collect();
    Ok(build(width, height, rgb))
}

fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
