//! Face analysis seam: detection plus embedding behind one trait.

use crate::detector::{DetectorError, DetectorMode, FaceDetector};
use crate::models::ModelPaths;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Locates faces and turns them into embeddings.
///
/// The reference extractor and the live session only talk to this trait, so
/// the model backend can be swapped (or faked in tests).
pub trait FaceAnalyzer {
    /// All faces in `image`, in the order the detector ranks them.
    fn detect(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Embedding for one face previously returned by [`detect`](Self::detect) on the same image.
    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError>;
}

/// SCRFD + ArcFace, both on ONNX Runtime.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(paths: &ModelPaths) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&paths.detector)?;
        let recognizer = FaceRecognizer::load(&paths.recognizer)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(image, mode)?)
    }

    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_load_reports_missing_detector_first() {
        let paths = ModelPaths::in_dir(Path::new("/nonexistent/facecheck-models"));
        let err = OnnxFaceAnalyzer::load(&paths).err().expect("load must fail");
        assert!(matches!(err, AnalyzerError::Detector(DetectorError::ModelNotFound(_))));
    }
}
