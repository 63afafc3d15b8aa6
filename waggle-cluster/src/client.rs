//! Connection-pooled RPC client for calling peer nodes.

use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::service::WaggleClusterClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tarpc::tokio_serde::formats::Bincode;
use tarpc::{client, context};
use tokio::sync::Mutex;
use tracing::debug;

/// Pools one tarpc client per peer address. Connections are created lazily
/// and dropped from the pool when a call fails on them.
pub struct ClusterClient {
    config: Arc<ClusterConfig>,
    connections: Mutex<HashMap<String, WaggleClusterClient>>,
}

impl ClusterClient {
    pub fn new(config: Arc<ClusterConfig>) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Get or establish a connection to `dest` (a `host:port` string).
    pub async fn get(&self, dest: &str) -> Result<WaggleClusterClient> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(dest) {
            return Ok(existing.clone());
        }

        debug!(dest = %dest, "connecting to peer");
        let mut transport = tarpc::serde_transport::tcp::connect(dest, Bincode::default);
        transport.config_mut().max_frame_length(usize::MAX);
        let transport = tokio::time::timeout(self.config.connect_timeout(), transport)
            .await
            .map_err(|_| ClusterError::Timeout(format!("connecting to {dest}")))?
            .map_err(|err| ClusterError::Transport(format!("connecting to {dest}: {err}")))?;

        let connected = WaggleClusterClient::new(client::Config::default(), transport).spawn();
        connections.insert(dest.to_string(), connected.clone());
        Ok(connected)
    }

    /// Forget a pooled connection, e.g. after a transport failure.
    pub async fn evict(&self, dest: &str) {
        self.connections.lock().await.remove(dest);
    }

    /// A call context carrying the configured request deadline.
    pub fn context(&self) -> context::Context {
        let mut ctx = context::current();
        ctx.deadline = Instant::now() + self.config.request_timeout();
        ctx
    }
}
