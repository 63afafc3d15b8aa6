//! Distance metrics for vector similarity.
//!
//! All metrics return a distance where **lower is better**. The metric is
//! fixed per collection for the life of a shard; the shard resolves it to a
//! plain function pointer once at open time.

use serde::{Deserialize, Serialize};

/// Distance function over two equal-length vectors.
pub type DistFn = fn(&[f32], &[f32]) -> f32;

/// Distance metric declared on a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    Euclidean,
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Euclidean
    }
}

impl DistanceMetric {
    /// Resolve the metric to its distance function.
    pub fn dist_fn(self) -> DistFn {
        match self {
            DistanceMetric::Euclidean => euclidean_sq,
            DistanceMetric::Cosine => cosine_distance,
        }
    }
}

/// Squared Euclidean distance. Skips the square root; ordering is preserved.
pub fn euclidean_sq(x: &[f32], y: &[f32]) -> f32 {
    x.iter()
        .zip(y.iter())
        .map(|(a, b)| {
            let diff = a - b;
            diff * diff
        })
        .sum()
}

/// Cosine distance: `1 - cos(x, y)`. Zero-norm vectors compare as maximally
/// distant rather than dividing by zero.
pub fn cosine_distance(x: &[f32], y: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_x = 0.0f32;
    let mut norm_y = 0.0f32;
    for (a, b) in x.iter().zip(y.iter()) {
        dot += a * b;
        norm_x += a * a;
        norm_y += b * b;
    }
    let denom = (norm_x * norm_y).sqrt();
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - dot / denom
}
