//! Cosine similarity scoring and threshold classification.

use crate::types::{Embedding, FrameOutcome};
use thiserror::Error;

/// Norms at or below this are treated as zero vectors.
pub const NORM_EPSILON: f32 = 1e-6;

/// Default match threshold when none is configured.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding norm is zero or not finite")]
    DegenerateEmbedding,
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)`.
///
/// Divides by the actual norms rather than assuming unit vectors, so drift in
/// upstream normalization does not push the result outside [-1, 1].
pub fn score(a: &Embedding, b: &Embedding) -> Result<f32, SimilarityError> {
    if a.dimension() != b.dimension() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.dimension(),
            right: b.dimension(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.values().iter().zip(b.values().iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if !(norm_a > NORM_EPSILON && norm_b > NORM_EPSILON) || !(norm_a * norm_b).is_finite() {
        return Err(SimilarityError::DegenerateEmbedding);
    }

    let sim = dot / (norm_a * norm_b);
    if !sim.is_finite() {
        return Err(SimilarityError::DegenerateEmbedding);
    }
    Ok(sim.clamp(-1.0, 1.0))
}

/// `true` when `score` reaches `threshold`.
pub fn classify(score: f32, threshold: f32) -> bool {
    score >= threshold
}

/// Scores probes against a reference with a fixed threshold.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityEngine {
    threshold: f32,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl SimilarityEngine {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn evaluate(
        &self,
        probe: &Embedding,
        reference: &Embedding,
    ) -> Result<FrameOutcome, SimilarityError> {
        let similarity = score(probe, reference)?;
        Ok(FrameOutcome::Scored {
            similarity,
            matched: classify(similarity, self.threshold),
        })
    }
}
