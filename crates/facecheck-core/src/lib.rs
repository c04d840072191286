//! facecheck-core — KYC face verification engine.
//!
//! Extracts a reference embedding from an identity document photo and
//! compares it against faces in a live frame stream until one matches.
//! Detection uses SCRFD and embeddings use ArcFace, both on ONNX Runtime
//! for CPU inference.
//!
//! The camera sits behind [`session::FrameSource`] and the models behind
//! [`analyzer::FaceAnalyzer`], so the whole pipeline runs without hardware.

pub mod alignment;
pub mod analyzer;
pub mod annotate;
pub mod detector;
pub mod matcher;
pub mod models;
pub mod recognizer;
pub mod reference;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use detector::DetectorMode;
pub use matcher::{DistanceMatcher, DistanceMetric, MatchDecision, Matcher, Verdict};
pub use models::ModelPaths;
pub use reference::{
    extract_reference, load_document, MultipleFacePolicy, ReferenceError, ReferenceFace,
    ReferenceOptions,
};
pub use session::{
    CameraOpener, CancelToken, CaptureError, EventSink, FrameSource, MatchEvent, SessionConfig,
    SessionError, SessionEvent, SessionOutcome, SessionState, VerificationSession,
};
pub use types::{BoundingBox, Embedding, FaceRegion};
