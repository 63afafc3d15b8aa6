//! waggle-cluster — distribution layer for the waggle vector engine.
//!
//! Collections are placed across nodes with rendezvous hashing and every
//! node serves a tarpc RPC surface for collection CRUD and shard
//! operations. Requests are destination-addressed: any member accepts any
//! request and forwards it to the owner when it is not local.
//!
//! # Architecture
//!
//! - **Placement**: rendezvous hashing over the member list, keyed by the
//!   owning user; plus the replica-write outcome contract.
//! - **Catalog**: node-local collection records in an embedded database,
//!   bincode-encoded exactly as they travel on the wire.
//! - **Shard manager**: opens shards on demand, keeps them resident, and
//!   idle-evicts them through per-shard timer tasks.
//! - **Service / Server / Client**: the tarpc definition, the executing
//!   node, and a connection-pooled client for peers.

pub mod catalog;
pub mod config;
pub mod error;
pub mod placement;
pub mod service;
pub mod shardmgr;
pub mod types;

mod client;
mod server;

pub use catalog::Catalog;
pub use client::ClusterClient;
pub use config::ClusterConfig;
pub use error::{ClusterError, Result};
pub use server::ClusterNode;
pub use service::{WaggleCluster, WaggleClusterClient};
pub use shardmgr::{ShardManager, ShardSignal};
pub use types::*;
