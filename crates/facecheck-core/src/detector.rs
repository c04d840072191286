//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD model on RGB frames at one of two input resolutions:
//! 640×640 for the document (`HighAccuracy`) and 320×320 for live frames
//! (`LowLatency`). Decoding is 3-stride anchor-free with NMS post-processing.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detector operating point. The document and the live feed use different modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorMode {
    /// Full 640×640 input; finds small faces such as ID-card photos.
    HighAccuracy,
    /// 320×320 input; roughly 4× cheaper per frame.
    LowLatency,
}

impl DetectorMode {
    /// Square model input edge length in pixels.
    pub fn input_size(&self) -> usize {
        match self {
            DetectorMode::HighAccuracy => 640,
            DetectorMode::LowLatency => 320,
        }
    }
}

/// Coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// Raw tensors produced for a single stride level.
struct StrideTensors<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32], discovered at load time.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces in an RGB image, returning boxes sorted by confidence (highest first).
    pub fn detect(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let input_size = mode.input_size();
        let (input, letterbox) = preprocess(image, input_size);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };

            let tensors = StrideTensors {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(decode_stride(
                &tensors,
                input_size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(?mode, faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox an RGB image into a `1×3×size×size` normalized tensor.
///
/// Padding is left at 0.0, which is what a pixel equal to `SCRFD_MEAN` normalizes to.
fn preprocess(image: &RgbImage, size: usize) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size as u32);
    let pad_x = (size as u32 - new_w) / 2;
    let pad_y = (size as u32 - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let ty = (y + pad_y) as usize;
        let tx = (x + pad_x) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, letterbox)
}

/// Map output tensor names to stride slots.
///
/// Exports either name tensors `score_8`, `bbox_16`, `kps_32`, ... or use
/// generic numeric names, in which case the standard positional ordering
/// `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]` is assumed.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::debug!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::debug!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode the detections of one stride level into source-image coordinates.
fn decode_stride(
    tensors: &StrideTensors<'_>,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let stride = tensors.stride;
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = tensors.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let Some(offsets) = tensors.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(anchor_x - offsets[0] * step, anchor_y - offsets[1] * step);
        let (x2, y2) = letterbox.unmap(anchor_x + offsets[2] * step, anchor_y + offsets[3] * step);

        let landmarks = tensors.kps.get(idx * 10..idx * 10 + 10).map(|kps| {
            std::array::from_fn(|i| {
                letterbox.unmap(anchor_x + kps[i * 2] * step, anchor_y + kps[i * 2 + 1] * step)
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by confidence, highest first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_mode_input_sizes() {
        assert_eq!(DetectorMode::HighAccuracy.input_size(), 640);
        assert_eq!(DetectorMode::LowLatency.input_size(), 320);
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // 50 / (100 + 100 - 50)
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_and_sorts() {
        let detections = vec![
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, SCRFD_NMS_THRESHOLD);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], SCRFD_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        // 200×100 into 320: scale 1.6 → 320×160, 80 rows of padding top and bottom
        let image = RgbImage::from_pixel(200, 100, image::Rgb([255, 255, 255]));
        let (tensor, letterbox) = preprocess(&image, 320);

        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        assert!((letterbox.scale - 1.6).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 80.0);

        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 79, 319]], 0.0);
        assert!((tensor[[0, 1, 80, 0]] - white).abs() < 1e-6);
        assert!((tensor[[0, 2, 239, 319]] - white).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 240, 10]], 0.0);
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let letterbox = Letterbox { scale: 0.5, pad_x: 0.0, pad_y: 80.0 };
        let (x, y) = letterbox.unmap(100.0 * 0.5, 50.0 * 0.5 + 80.0);
        assert!((x - 100.0).abs() < 1e-4);
        assert!((y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // stride 32 on a 64×64 input: 2×2 grid, 8 anchors
        let mut scores = vec![0.0f32; 8];
        scores[3] = 0.9; // second anchor of cell 1 → cell (x=1, y=0)
        let mut bboxes = vec![0.0f32; 8 * 4];
        bboxes[12..16].copy_from_slice(&[0.5, 0.25, 0.5, 1.0]);
        let kps = vec![0.0f32; 8 * 10];

        let tensors = StrideTensors { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&tensors, 64, &letterbox, SCRFD_CONFIDENCE_THRESHOLD);

        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        // anchor centre (32, 0); x1 = 32 - 16, y1 = 0 - 8, x2 = 32 + 16, y2 = 0 + 32
        assert!((det.x - 16.0).abs() < 1e-4);
        assert!((det.y + 8.0).abs() < 1e-4);
        assert!((det.width - 32.0).abs() < 1e-4);
        assert!((det.height - 40.0).abs() < 1e-4);
        let landmarks = det.landmarks.expect("landmarks decoded");
        assert!(landmarks.iter().all(|&(x, y)| (x - 32.0).abs() < 1e-4 && y.abs() < 1e-4));
    }

    #[test]
    fn test_decode_stride_below_threshold() {
        let scores = vec![0.5f32; 8];
        let bboxes = vec![0.0f32; 8 * 4];
        let kps = vec![0.0f32; 8 * 10];
        let tensors = StrideTensors { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(decode_stride(&tensors, 64, &letterbox, SCRFD_CONFIDENCE_THRESHOLD).is_empty());
    }

    #[test]
    fn test_discover_output_indices_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
