//! Collection metadata and the point types exchanged with callers.
//!
//! A collection is read-only to the shard: the cluster layer owns the record
//! and hands a copy to each shard at open time. Index parameters are fixed
//! for the life of the collection.

use crate::distance::DistanceMetric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tuning parameters for the proximity graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexParameters {
    /// Working-set size during greedy search (L). Larger trades latency for recall.
    #[serde(default = "default_search_size")]
    pub search_size: usize,

    /// Maximum out-degree per point (R).
    #[serde(default = "default_degree_bound")]
    pub degree_bound: usize,

    /// Diversity factor for robust prune (α ≥ 1.0).
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

fn default_search_size() -> usize {
    75
}

fn default_degree_bound() -> usize {
    64
}

fn default_alpha() -> f32 {
    1.2
}

impl Default for IndexParameters {
    fn default() -> Self {
        Self {
            search_size: default_search_size(),
            degree_bound: default_degree_bound(),
            alpha: default_alpha(),
        }
    }
}

/// A named collection of vectors, split across one or more shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Collection identifier, unique per user.
    pub id: String,

    /// Owning user.
    pub user_id: String,

    /// Dimensionality of every vector in the collection.
    pub vector_size: usize,

    /// Distance metric used by every shard of this collection.
    #[serde(default)]
    pub distance_metric: DistanceMetric,

    /// Shards created for this collection, in creation order.
    #[serde(default)]
    pub shard_ids: Vec<String>,

    /// Graph tuning parameters.
    #[serde(default)]
    pub parameters: IndexParameters,
}

/// A point as seen by callers: identity, vector, opaque metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Option<Vec<u8>>,
}

/// A search result: the matched point plus its distance to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPoint {
    pub point: Point,
    pub distance: f32,
}
