//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Requested capture size. Drivers may negotiate something else.
pub const REQUESTED_WIDTH: u32 = 640;
pub const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;
/// Longest wait for a single buffer before capture is reported as stalled.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("no frame from camera within {0:?}")]
    Timeout(Duration),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("{0} is not a video capture device")]
    StreamingNotSupported(String),
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed RGB24.
    Rgb3,
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(Self::Rgb3),
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    /// Convert one raw driver buffer to RGB8. `stride` is bytes per line
    /// as reported by the driver; 0 means packed rows.
    pub fn decode(
        &self,
        buf: &[u8],
        width: u32,
        height: u32,
        stride: usize,
    ) -> Result<image::RgbImage, FrameError> {
        match self {
            Self::Rgb3 => frame::rgb3_to_rgb(buf, width, height, stride),
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height, stride),
            Self::Grey => frame::grey_to_rgb(buf, width, height, stride),
            Self::Y16 => frame::y16_to_rgb(buf, width, height, stride),
        }
    }
}

/// An open, streaming V4L2 camera.
///
/// The mmap stream is created once at open and held for the camera's
/// lifetime. Dropping the camera stops streaming and closes the device.
pub struct Camera {
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    stride: usize,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(EBUSY) {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported(device_path.to_string()));
        }

        let (width, height, stride, pixel_format) = negotiate_format(&device)?;

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| {
                if e.raw_os_error() == Some(EBUSY) {
                    CameraError::DeviceBusy(device_path.to_string())
                } else {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                }
            })?;
        // A stalled driver would otherwise block the capture thread forever.
        stream.set_timeout(CAPTURE_TIMEOUT);

        Ok(Self {
            stream,
            width,
            height,
            device_path: device_path.to_string(),
            pixel_format,
            stride,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Dequeue the next frame and convert it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| dequeue_error(e, CAPTURE_TIMEOUT))?;
        let sequence = meta.sequence;

        let image = self
            .pixel_format
            .decode(buf, self.width, self.height, self.stride)?;
        tracing::trace!(seq = sequence, bytes = buf.len(), "captured frame");

        Ok(Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

fn dequeue_error(e: io::Error, timeout: Duration) -> CameraError {
    match e.kind() {
        io::ErrorKind::TimedOut => CameraError::Timeout(timeout),
        _ => CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")),
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::debug!(device = %self.device_path, "releasing camera");
    }
}

/// Ask for RGB3 at the requested size, fall back to YUYV, and otherwise
/// accept whatever supported format the driver settles on.
fn negotiate_format(device: &Device) -> Result<(u32, u32, usize, PixelFormat), CameraError> {
    let mut fmt = device.format().map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
    })?;
    fmt.width = REQUESTED_WIDTH;
    fmt.height = REQUESTED_HEIGHT;

    let mut negotiated = fmt;
    for fourcc in [FourCC::new(b"RGB3"), FourCC::new(b"YUYV")] {
        fmt.fourcc = fourcc;
        match device.set_format(&fmt) {
            Ok(result) => {
                negotiated = result;
                if negotiated.fourcc == fourcc {
                    break;
                }
            }
            Err(e) => tracing::debug!(fourcc = %fourcc, error = %e, "format rejected"),
        }
    }

    let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format: {} (need RGB3, YUYV, GREY, or Y16)",
            negotiated.fourcc
        ))
    })?;

    tracing::info!(
        width = negotiated.width,
        height = negotiated.height,
        stride = negotiated.stride,
        fourcc = %negotiated.fourcc,
        "negotiated format"
    );

    Ok((
        negotiated.width,
        negotiated.height,
        negotiated.stride as usize,
        pixel_format,
    ))
}
