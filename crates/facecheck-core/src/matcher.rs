//! Match decision between a reference embedding and a live face.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};

/// Default maximum distance accepted as the same identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// How two embeddings are turned into a distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`, in [0, 2].
    #[default]
    Cosine,
    /// L2 distance between the raw vectors.
    Euclidean,
}

impl DistanceMetric {
    /// Distance between two embeddings. Mismatched dimensions are infinitely far apart.
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        if a.dim() != b.dim() {
            return f32::INFINITY;
        }
        match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => 1.0 - a.similarity(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Match,
    NotMatched,
}

impl Verdict {
    /// Short label drawn next to a face box.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Match => "MATCH",
            Verdict::NotMatched => "NOT MATCHED",
        }
    }

    /// Status line shown while the live loop runs.
    pub fn status(&self) -> &'static str {
        match self {
            Verdict::Match => "FACE VERIFIED",
            Verdict::NotMatched => "FACE NOT MATCHED",
        }
    }

    /// Box and label colour: green for a match, red otherwise.
    pub fn color(&self) -> [u8; 3] {
        match self {
            Verdict::Match => [0, 255, 0],
            Verdict::NotMatched => [255, 0, 0],
        }
    }
}

/// Outcome of comparing one live face against the reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchDecision {
    pub distance: f32,
    pub matched: bool,
    /// `clamp(1 - distance, 0, 1)`.
    pub confidence: f32,
    pub verdict: Verdict,
}

/// Confidence shown for a given distance: `clamp(1 - d, 0, 1)`, NaN maps to 0.
pub fn confidence(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Strategy for deciding whether a live embedding belongs to the reference identity.
pub trait Matcher {
    fn compare(&self, reference: &Embedding, live: &Embedding) -> MatchDecision;
}

/// Threshold matcher: `matched ⇔ distance < threshold` (strict).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceMatcher {
    pub threshold: f32,
    pub metric: DistanceMetric,
}

impl DistanceMatcher {
    pub fn new(threshold: f32, metric: DistanceMetric) -> Self {
        Self { threshold, metric }
    }

    /// Apply the threshold to an already computed distance.
    pub fn decide(&self, distance: f32) -> MatchDecision {
        // NaN never compares less than the threshold, so it is never a match.
        let matched = distance < self.threshold;
        MatchDecision {
            distance,
            matched,
            confidence: confidence(distance),
            verdict: if matched { Verdict::Match } else { Verdict::NotMatched },
        }
    }
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD, DistanceMetric::Cosine)
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, reference: &Embedding, live: &Embedding) -> MatchDecision {
        self.decide(self.metric.distance(reference, live))
    }
}
