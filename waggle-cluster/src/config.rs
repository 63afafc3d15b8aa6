//! Cluster node configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a single cluster node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// This node's identity; requests are routed by comparing their
    /// destination against it. Must appear in `servers`.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Address the RPC server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Root of the shard directory tree (`<root>/<user>/<collection>/<shard>`).
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Replica count for placement decisions. At least 1.
    #[serde(default = "default_replication")]
    pub general_replication: usize,

    /// Seconds an idle shard stays resident before the manager closes it.
    #[serde(default = "default_shard_timeout")]
    pub shard_timeout_secs: u64,

    /// All cluster members, as dialable `host:port` strings.
    #[serde(default)]
    pub servers: Vec<String>,

    /// Per-request RPC deadline in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Timeout for establishing a connection to a peer, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_node_id() -> String {
    "127.0.0.1:11001".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:11001".to_string()
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_replication() -> usize {
    1
}

fn default_shard_timeout() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    5_000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            bind_addr: default_bind_addr(),
            root_dir: default_root_dir(),
            general_replication: default_replication(),
            shard_timeout_secs: default_shard_timeout(),
            servers: Vec::new(),
            request_timeout_ms: default_request_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl ClusterConfig {
    /// Idle-shard eviction timeout as a Duration.
    pub fn shard_timeout(&self) -> Duration {
        Duration::from_secs(self.shard_timeout_secs)
    }

    /// Per-request RPC deadline as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Peer connection timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
