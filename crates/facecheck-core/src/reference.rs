//! Reference extraction: identity document → one face embedding.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::detector::DetectorMode;
use crate::types::{BoundingBox, Embedding, FaceRegion};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("cannot read document {path}: {source}")]
    DocumentUnreadable {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("no face found in document")]
    DocumentFaceNotFound,
    #[error("document contains {count} faces; expected exactly one")]
    AmbiguousDocument { count: usize },
    #[error("document analysis failed: {0}")]
    Analysis(#[from] AnalyzerError),
}

/// What to do when the document shows more than one face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultipleFacePolicy {
    /// Refuse the document.
    #[default]
    Reject,
    /// Take the detector's first (highest ranked) face.
    UseFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceOptions {
    pub detector_mode: DetectorMode,
    pub multiple_faces: MultipleFacePolicy,
}

impl Default for ReferenceOptions {
    fn default() -> Self {
        Self {
            detector_mode: DetectorMode::HighAccuracy,
            multiple_faces: MultipleFacePolicy::Reject,
        }
    }
}

/// The reference identity for one verification session. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceFace {
    embedding: Embedding,
    region: FaceRegion,
    detection: BoundingBox,
    faces_detected: usize,
}

impl ReferenceFace {
    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    /// Where the face sits in the document image.
    pub fn region(&self) -> FaceRegion {
        self.region
    }

    pub fn detection_confidence(&self) -> f32 {
        self.detection.confidence
    }

    /// Faces the detector saw in the document, including any that were not used.
    pub fn faces_detected(&self) -> usize {
        self.faces_detected
    }
}

/// Decode a JPEG/PNG document into RGB8.
pub fn load_document(path: &Path) -> Result<RgbImage, ReferenceError> {
    let image = image::open(path).map_err(|source| ReferenceError::DocumentUnreadable {
        path: path.display().to_string(),
        source,
    })?;
    tracing::debug!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "document loaded"
    );
    Ok(image.to_rgb8())
}

/// Locate the document face and compute its embedding.
pub fn extract_reference<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    document: &RgbImage,
    options: &ReferenceOptions,
) -> Result<ReferenceFace, ReferenceError> {
    let faces = analyzer.detect(document, options.detector_mode)?;

    let chosen = match (faces.len(), options.multiple_faces) {
        (0, _) => return Err(ReferenceError::DocumentFaceNotFound),
        (1, _) => &faces[0],
        (count, MultipleFacePolicy::Reject) => {
            return Err(ReferenceError::AmbiguousDocument { count });
        }
        (count, MultipleFacePolicy::UseFirst) => {
            tracing::warn!(count, "document has several faces; using the first detection");
            &faces[0]
        }
    };

    let embedding = analyzer.embed(document, chosen)?;
    let region = FaceRegion::from_bbox(chosen, document.width(), document.height());

    tracing::info!(
        confidence = chosen.confidence,
        faces = faces.len(),
        dim = embedding.dim(),
        ?region,
        "reference face extracted"
    );

    Ok(ReferenceFace {
        embedding,
        region,
        detection: chosen.clone(),
        faces_detected: faces.len(),
    })
}

#[cfg(test)]
impl ReferenceFace {
    pub(crate) fn from_embedding(values: &[f32]) -> Self {
        let detection = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 1.0,
            landmarks: None,
        };
        Self {
            embedding: Embedding::new(values.to_vec()),
            region: FaceRegion::from_bbox(&detection, 10, 10),
            detection,
            faces_detected: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_face, ScriptedAnalyzer};

    fn blank_document() -> RgbImage {
        RgbImage::from_pixel(320, 200, image::Rgb([255, 255, 255]))
    }

    #[test]
    fn test_no_face_is_document_face_not_found() {
        let mut analyzer = ScriptedAnalyzer::new(vec![Some(vec![])]);
        let err = extract_reference(&mut analyzer, &blank_document(), &ReferenceOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReferenceError::DocumentFaceNotFound));
        assert_eq!(analyzer.embed_calls, 0);
    }

    #[test]
    fn test_single_face_gives_one_embedding() {
        let mut analyzer = ScriptedAnalyzer::new(vec![Some(vec![fake_face(30.0, &[0.6, 0.8])])]);
        let reference =
            extract_reference(&mut analyzer, &blank_document(), &ReferenceOptions::default())
                .unwrap();

        assert_eq!(reference.embedding().values, vec![0.6, 0.8]);
        assert_eq!(reference.faces_detected(), 1);
        assert_eq!(reference.region().left, 30);
        assert_eq!(reference.region().right, 70);
        assert_eq!(analyzer.embed_calls, 1);
    }

    #[test]
    fn test_document_uses_high_accuracy_by_default() {
        let mut analyzer = ScriptedAnalyzer::new(vec![Some(vec![fake_face(30.0, &[1.0])])]);
        extract_reference(&mut analyzer, &blank_document(), &ReferenceOptions::default()).unwrap();
        assert_eq!(analyzer.detect_modes, vec![DetectorMode::HighAccuracy]);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let faces = vec![fake_face(12.0, &[0.1, 0.2, 0.3])];
        let mut analyzer = ScriptedAnalyzer::repeating(faces, 2);
        let doc = blank_document();
        let first = extract_reference(&mut analyzer, &doc, &ReferenceOptions::default()).unwrap();
        let second = extract_reference(&mut analyzer, &doc, &ReferenceOptions::default()).unwrap();
        assert_eq!(first.embedding(), second.embedding());
        assert_eq!(first.region(), second.region());
    }

    #[test]
    fn test_multiple_faces_rejected_by_default() {
        let faces = vec![fake_face(10.0, &[1.0, 0.0]), fake_face(150.0, &[0.0, 1.0])];
        let mut analyzer = ScriptedAnalyzer::new(vec![Some(faces)]);
        let err = extract_reference(&mut analyzer, &blank_document(), &ReferenceOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReferenceError::AmbiguousDocument { count: 2 }));
        assert_eq!(analyzer.embed_calls, 0);
    }

    #[test]
    fn test_multiple_faces_use_first_when_allowed() {
        let faces = vec![fake_face(10.0, &[1.0, 0.0]), fake_face(150.0, &[0.0, 1.0])];
        let mut analyzer = ScriptedAnalyzer::new(vec![Some(faces)]);
        let options = ReferenceOptions {
            multiple_faces: MultipleFacePolicy::UseFirst,
            ..ReferenceOptions::default()
        };
        let reference = extract_reference(&mut analyzer, &blank_document(), &options).unwrap();
        assert_eq!(reference.embedding().values, vec![1.0, 0.0]);
        assert_eq!(reference.faces_detected(), 2);
    }

    #[test]
    fn test_detector_failure_is_analysis_error() {
        let mut analyzer = ScriptedAnalyzer::new(vec![None]);
        let err = extract_reference(&mut analyzer, &blank_document(), &ReferenceOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReferenceError::Analysis(_)));
    }

    #[test]
    fn test_load_document_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.png");
        RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30])).save(&path).unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.dimensions(), (8, 6));
        assert_eq!(doc.get_pixel(0, 0), &image::Rgb([10, 20, 30]));
    }

    #[test]
    fn test_load_document_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let err = load_document(&path).unwrap_err();
        assert!(matches!(err, ReferenceError::DocumentUnreadable { .. }));
    }
}
