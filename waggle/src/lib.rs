//! # waggle
//!
//! Embedded vector index shard: points live in a transactional on-disk
//! store, a Vamana-style proximity graph is maintained incrementally under
//! insertion, update and deletion, and approximate nearest-neighbour queries
//! run as greedy traversals from a fixed entry point.
//!
//! This crate is the single-process engine; sharding, placement and RPC live
//! in `waggle-cluster`.

/// Collection metadata, point types and index parameters.
pub mod collection;
/// Distance metrics and their function-pointer dispatch.
pub mod distance;
/// Engine error type.
pub mod error;
/// The shard: store, cache, graph algorithms and the orchestrator.
pub mod shard;

pub use collection::{Collection, IndexParameters, Point, SearchPoint};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use shard::{Shard, ShardInfo};
