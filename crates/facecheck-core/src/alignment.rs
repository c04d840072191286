//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face into the canonical 112×112 ArcFace crop using the
//! five InsightFace reference landmarks and a least-squares fit.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub(crate) const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` landmarks onto `dst`.
    ///
    /// Each point pair contributes two rows to the normal equations:
    /// `[sx, -sy, 1, 0]·p = dx` and `[sy, sx, 0, 1]·p = dy`, `p = [a, b, tx, ty]`.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
            for (row, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * rhs;
                }
            }
        }

        match solve_4x4(ata, atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 },
        }
    }

    /// Map an output-space point back into the source image.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Gaussian elimination with partial pivoting. `None` for a (near-)singular system.
fn solve_4x4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    let magnitude = m.iter().flatten().fold(0.0f32, |acc, v| acc.max(v.abs()));
    let eps = magnitude.max(1.0) * 1e-6;

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < eps {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..4 {
                m[row][j] -= factor * m[col][j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of one pixel; out-of-bounds neighbours read as black.
fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let fetch = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
            let p = image.get_pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr) = (fetch(x0, y0), fetch(x0 + 1, y0));
    let (bl, br) = (fetch(x0, y0 + 1), fetch(x0 + 1, y0 + 1));

    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Align a detected face to a canonical 112×112 RGB crop for ArcFace.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);

    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample_bilinear(image, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let t = Similarity::estimate(&pts, &pts);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_scaled_transform() {
        // Landmarks at 2× the reference scale → a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 1e-3, "a = {}", t.a);
        assert!(t.b.abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_landmarks_fall_back() {
        let src = [(10.0, 10.0); 5];
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!(t.a.is_finite() && t.b.is_finite());
    }

    #[test]
    fn test_invert_point_roundtrip() {
        let t = Similarity { a: 0.8, b: 0.3, tx: 5.0, ty: -2.0 };
        let (sx, sy) = (40.0f32, 25.0f32);
        let dx = t.a * sx - t.b * sy + t.tx;
        let dy = t.b * sx + t.a * sy + t.ty;
        let (rx, ry) = t.invert_point(dx, dy).expect("invertible");
        assert!((rx - sx).abs() < 1e-3 && (ry - sy).abs() < 1e-3);
    }

    #[test]
    fn test_align_face_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128, 64, 32]));
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(aligned.get_pixel(56, 56), &Rgb([128, 64, 32]));
    }

    #[test]
    fn test_landmark_lands_on_reference_position() {
        let mut image = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5×5 red patch on the left eye
        for dy in 0..5 {
            for dx in 0..5 {
                image.put_pixel(78 + dx, 58 + dy, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&image, &src);
        let rx = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ry = REFERENCE_LANDMARKS_112[0].1.round() as u32;

        let max_red = (rx - 1..=rx + 1)
            .flat_map(|x| (ry - 1..=ry + 1).map(move |y| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap_or(0);
        assert!(max_red > 100, "expected red patch near ({rx}, {ry}), max={max_red}");
    }
}
