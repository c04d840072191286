//! Scripted fakes shared by the unit tests.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::detector::{DetectorError, DetectorMode};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::collections::VecDeque;

/// A face the fake detector will report, with the embedding it encodes to.
#[derive(Clone)]
pub(crate) struct FakeFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

pub(crate) fn fake_face(x: f32, values: &[f32]) -> FakeFace {
    FakeFace {
        bbox: BoundingBox {
            x,
            y: 20.0,
            width: 40.0,
            height: 50.0,
            confidence: 0.9,
            landmarks: Some([(0.0, 0.0); 5]),
        },
        embedding: Embedding::new(values.to_vec()),
    }
}

/// Replays one scripted detection result per `detect` call.
///
/// `None` in the script makes that call fail. Once the script runs out every
/// further call detects nothing.
#[derive(Default)]
pub(crate) struct ScriptedAnalyzer {
    script: VecDeque<Option<Vec<FakeFace>>>,
    current: Vec<FakeFace>,
    pub detect_modes: Vec<DetectorMode>,
    pub embed_calls: usize,
}

impl ScriptedAnalyzer {
    pub fn new(script: Vec<Option<Vec<FakeFace>>>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    /// Every detect call returns the same faces.
    pub fn repeating(faces: Vec<FakeFace>, calls: usize) -> Self {
        Self::new(vec![Some(faces); calls])
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn detect(
        &mut self,
        _image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Vec<BoundingBox>, AnalyzerError> {
        self.detect_modes.push(mode);
        match self.script.pop_front() {
            Some(Some(faces)) => {
                self.current = faces;
                Ok(self.current.iter().map(|f| f.bbox.clone()).collect())
            }
            Some(None) => Err(DetectorError::InferenceFailed("scripted failure".into()).into()),
            None => {
                self.current.clear();
                Ok(Vec::new())
            }
        }
    }

    fn embed(&mut self, _image: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        self.embed_calls += 1;
        self.current
            .iter()
            .find(|f| f.bbox.x == face.x)
            .map(|f| f.embedding.clone())
            .ok_or_else(|| DetectorError::InferenceFailed("unknown face".into()).into())
    }
}
