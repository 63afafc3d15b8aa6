//! Cluster RPC server: executes destination-matched requests against local
//! shards and forwards the rest to their owner.

use crate::catalog::Catalog;
use crate::client::ClusterClient;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::service::WaggleCluster;
use crate::shardmgr::ShardManager;
use crate::types::*;
use futures::{future, StreamExt};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tarpc::context::Context;
use tracing::{debug, info};
use uuid::Uuid;

struct NodeInner {
    config: Arc<ClusterConfig>,
    catalog: Arc<Catalog>,
    shards: ShardManager,
    client: ClusterClient,
}

/// One cluster member: catalog, shard manager and peer client behind a cheap
/// clonable handle.
#[derive(Clone)]
pub struct ClusterNode {
    inner: Arc<NodeInner>,
}

impl ClusterNode {
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let config = Arc::new(config);
        let catalog = Arc::new(Catalog::open(&config.root_dir)?);
        let shards = ShardManager::new(Arc::clone(&config), Arc::clone(&catalog));
        let client = ClusterClient::new(Arc::clone(&config));
        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                catalog,
                shards,
                client,
            }),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.inner.config.node_id
    }

    pub fn shard_manager(&self) -> &ShardManager {
        &self.inner.shards
    }

    /// Serve RPC requests until the process exits.
    pub async fn run(self) -> Result<()> {
        let (addr, running) = self.listen().await?;
        info!(addr = %addr, node_id = %self.node_id(), "cluster server started");
        running.await;
        Ok(())
    }

    /// Bind the configured address and return the bound address plus the
    /// accept-loop future, so callers control where it runs.
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, impl std::future::Future<Output = ()> + Send + 'static)> {
        let mut listener =
            tarpc::serde_transport::tcp::listen(&self.inner.config.bind_addr, Bincode::default)
                .await?;
        listener.config_mut().max_frame_length(usize::MAX);
        let addr = listener.local_addr();
        let node = self.clone();
        let running = listener
            .filter_map(|accepted| future::ready(accepted.ok()))
            .map(BaseChannel::with_defaults)
            .map(move |channel| {
                let node = node.clone();
                channel
                    .execute(node.serve())
                    .for_each(|response| async move {
                        tokio::spawn(response);
                    })
            })
            .buffer_unordered(64)
            .for_each(|_| async {});
        Ok((addr, running))
    }

    fn is_local(&self, args: &RequestArgs) -> bool {
        args.dest == self.inner.config.node_id
    }

    async fn peer(&self, dest: &str) -> Result<crate::service::WaggleClusterClient> {
        self.inner.client.get(dest).await
    }

    fn rpc_context(&self) -> Context {
        self.inner.client.context()
    }
}

// One forwarding arm per method: resolve the peer, repeat the call there,
// and drop the pooled connection if the transport failed.
macro_rules! forward {
    ($node:expr, $method:ident, $req:expr) => {{
        let dest = $req.args.dest.clone();
        debug!(dest = %dest, method = stringify!($method), "forwarding request");
        let peer = $node.peer(&dest).await?;
        match peer.$method($node.rpc_context(), $req).await {
            Ok(result) => result,
            Err(rpc_err) => {
                $node.inner.client.evict(&dest).await;
                Err(ClusterError::from(rpc_err))
            }
        }
    }};
}

impl WaggleCluster for ClusterNode {
    async fn create_collection(
        self,
        _: Context,
        req: CreateCollectionRequest,
    ) -> Result<CreateCollectionResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, create_collection, req);
        }
        debug!(collection = %req.collection.id, user = %req.collection.user_id, "create collection");
        let already_exists = self.inner.catalog.create_collection(&req.collection)?;
        Ok(CreateCollectionResponse { already_exists })
    }

    async fn list_collections(
        self,
        _: Context,
        req: ListCollectionsRequest,
    ) -> Result<ListCollectionsResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, list_collections, req);
        }
        debug!(user = %req.user_id, "list collections");
        let collections = self.inner.catalog.list_collections(&req.user_id)?;
        Ok(ListCollectionsResponse { collections })
    }

    async fn get_collection(
        self,
        _: Context,
        req: GetCollectionRequest,
    ) -> Result<GetCollectionResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, get_collection, req);
        }
        debug!(user = %req.user_id, collection = %req.collection_id, "get collection");
        let collection = self
            .inner
            .catalog
            .get_collection(&req.user_id, &req.collection_id)?;
        Ok(GetCollectionResponse { collection })
    }

    async fn create_shard(
        self,
        _: Context,
        req: CreateShardRequest,
    ) -> Result<CreateShardResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, create_shard, req);
        }
        debug!(user = %req.user_id, collection = %req.collection_id, "create shard");
        let shard_id = self
            .inner
            .catalog
            .create_shard(&req.user_id, &req.collection_id)?;
        Ok(CreateShardResponse { shard_id })
    }

    async fn insert_points(
        self,
        _: Context,
        req: InsertPointsRequest,
    ) -> Result<InsertPointsResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, insert_points, req);
        }
        debug!(
            user = %req.user_id,
            collection = %req.collection_id,
            shard = %req.shard_id,
            count = req.points.len(),
            "insert points"
        );
        let points = req.points;
        let count = self
            .inner
            .shards
            .with_shard(&req.user_id, &req.collection_id, &req.shard_id, move |s| {
                s.insert_points(points)
            })
            .await?;
        Ok(InsertPointsResponse { count })
    }

    async fn update_points(
        self,
        _: Context,
        req: UpdatePointsRequest,
    ) -> Result<UpdatePointsResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, update_points, req);
        }
        debug!(
            user = %req.user_id,
            collection = %req.collection_id,
            shard = %req.shard_id,
            count = req.points.len(),
            "update points"
        );
        let points = req.points;
        let updated_ids = self
            .inner
            .shards
            .with_shard(&req.user_id, &req.collection_id, &req.shard_id, move |s| {
                s.update_points(points)
            })
            .await?;
        Ok(UpdatePointsResponse { updated_ids })
    }

    async fn delete_points(
        self,
        _: Context,
        req: DeletePointsRequest,
    ) -> Result<DeletePointsResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, delete_points, req);
        }
        debug!(
            user = %req.user_id,
            collection = %req.collection_id,
            shard = %req.shard_id,
            count = req.ids.len(),
            "delete points"
        );
        let delete_set: HashSet<Uuid> = req.ids.into_iter().collect();
        let deleted = self
            .inner
            .shards
            .with_shard(&req.user_id, &req.collection_id, &req.shard_id, move |s| {
                s.delete_points(&delete_set)
            })
            .await?;
        Ok(DeletePointsResponse {
            count: deleted.len(),
        })
    }

    async fn search_points(
        self,
        _: Context,
        req: SearchPointsRequest,
    ) -> Result<SearchPointsResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, search_points, req);
        }
        debug!(
            user = %req.user_id,
            collection = %req.collection_id,
            shard = %req.shard_id,
            limit = req.limit,
            "search points"
        );
        let (vector, limit) = (req.vector, req.limit);
        let points = self
            .inner
            .shards
            .with_shard(&req.user_id, &req.collection_id, &req.shard_id, move |s| {
                s.search_points(&vector, limit)
            })
            .await?;
        Ok(SearchPointsResponse { points })
    }

    async fn get_shard_info(
        self,
        _: Context,
        req: GetShardInfoRequest,
    ) -> Result<GetShardInfoResponse> {
        if !self.is_local(&req.args) {
            return forward!(self, get_shard_info, req);
        }
        debug!(
            user = %req.user_id,
            collection = %req.collection_id,
            shard = %req.shard_id,
            "get shard info"
        );
        let info = self
            .inner
            .shards
            .with_shard(&req.user_id, &req.collection_id, &req.shard_id, |s| s.info())
            .await?;
        Ok(GetShardInfoResponse {
            point_count: info.point_count,
            size_bytes: info.in_use_bytes,
        })
    }
}
