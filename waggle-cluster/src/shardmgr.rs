//! Shard manager: opens shards on demand, keeps them resident, and closes
//! them after an idle timeout.
//!
//! The manager holds one entry per shard directory, so at most one open
//! store handle exists per shard process-wide. Every loaded shard owns an
//! eviction task that waits on a signal channel: a `Reset` restarts the idle
//! timer, a `Close` (or manager shutdown) unloads immediately, and a timeout
//! unloads after `shard_timeout`. Operations run against an `Arc<Shard>`
//! clone on a blocking thread, so an eviction that races an in-flight
//! operation only unmaps the shard — the store file closes when the last
//! clone drops, never underneath a running operation.

use crate::catalog::Catalog;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use waggle::Shard;

/// Control messages for a loaded shard's eviction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardSignal {
    /// Restart the idle timer.
    Reset,
    /// Unload now.
    Close,
}

struct LoadedShard {
    shard: Arc<Shard>,
    signal: mpsc::UnboundedSender<ShardSignal>,
}

type ShardMap = Arc<Mutex<HashMap<PathBuf, LoadedShard>>>;

pub struct ShardManager {
    config: Arc<ClusterConfig>,
    catalog: Arc<Catalog>,
    shards: ShardMap,
}

impl ShardManager {
    pub fn new(config: Arc<ClusterConfig>, catalog: Arc<Catalog>) -> Self {
        Self {
            config,
            catalog,
            shards: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The directory a shard lives in: `<root>/<user>/<collection>/<shard>`.
    pub fn shard_dir(&self, user_id: &str, collection_id: &str, shard_id: &str) -> PathBuf {
        self.config
            .root_dir
            .join(user_id)
            .join(collection_id)
            .join(shard_id)
    }

    /// Run `f` against the shard, loading it first if necessary. The closure
    /// executes on a blocking thread since shard operations do disk IO.
    pub async fn with_shard<R, F>(
        &self,
        user_id: &str,
        collection_id: &str,
        shard_id: &str,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(&Shard) -> waggle::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let shard = self.acquire(user_id, collection_id, shard_id).await?;
        let outcome = tokio::task::spawn_blocking(move || f(&shard))
            .await
            .map_err(|err| ClusterError::Shard(format!("shard operation panicked: {err}")))?;
        outcome.map_err(ClusterError::from)
    }

    /// Number of shards currently resident.
    pub async fn loaded_count(&self) -> usize {
        self.shards.lock().await.len()
    }

    /// Unload every shard promptly.
    pub async fn shutdown(&self) {
        let shards = self.shards.lock().await;
        for (dir, loaded) in shards.iter() {
            if loaded.signal.send(ShardSignal::Close).is_err() {
                warn!(dir = %dir.display(), "eviction task already gone during shutdown");
            }
        }
    }

    async fn acquire(
        &self,
        user_id: &str,
        collection_id: &str,
        shard_id: &str,
    ) -> Result<Arc<Shard>> {
        let dir = self.shard_dir(user_id, collection_id, shard_id);
        let mut shards = self.shards.lock().await;
        if let Some(loaded) = shards.get(&dir) {
            debug!(dir = %dir.display(), "reusing resident shard");
            let _ = loaded.signal.send(ShardSignal::Reset);
            return Ok(Arc::clone(&loaded.shard));
        }

        let collection = self
            .catalog
            .get_collection(user_id, collection_id)?
            .ok_or_else(|| {
                ClusterError::NotFound(format!("collection {user_id}/{collection_id}"))
            })?;

        debug!(dir = %dir.display(), "opening shard");
        let open_dir = dir.clone();
        let shard = tokio::task::spawn_blocking(move || Shard::open(&open_dir, collection))
            .await
            .map_err(|err| ClusterError::Shard(format!("shard open panicked: {err}")))??;
        let shard = Arc::new(shard);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        shards.insert(
            dir.clone(),
            LoadedShard {
                shard: Arc::clone(&shard),
                signal: signal_tx,
            },
        );
        tokio::spawn(evict_when_idle(
            dir,
            signal_rx,
            Arc::clone(&self.shards),
            self.config.shard_timeout(),
        ));
        Ok(shard)
    }
}

async fn evict_when_idle(
    dir: PathBuf,
    mut signals: mpsc::UnboundedReceiver<ShardSignal>,
    shards: ShardMap,
    timeout: Duration,
) {
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(ShardSignal::Reset) => {
                    debug!(dir = %dir.display(), "shard idle timer reset");
                }
                Some(ShardSignal::Close) | None => {
                    unload(&dir, &shards).await;
                    return;
                }
            },
            _ = tokio::time::sleep(timeout) => {
                // A Reset racing the timeout may already be queued; honor it
                // instead of evicting a shard that was just handed out.
                if let Ok(ShardSignal::Reset) = signals.try_recv() {
                    debug!(dir = %dir.display(), "shard idle timer reset at deadline");
                    continue;
                }
                debug!(dir = %dir.display(), "unloading idle shard");
                unload(&dir, &shards).await;
                return;
            }
        }
    }
}

async fn unload(dir: &Path, shards: &ShardMap) {
    let mut map = shards.lock().await;
    if map.remove(dir).is_some() {
        debug!(dir = %dir.display(), "closed shard");
    }
}
