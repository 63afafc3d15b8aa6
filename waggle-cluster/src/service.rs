//! tarpc service definition for inter-node RPC.
//!
//! One request/response pair per operation. Every request carries a
//! destination; servers execute locally when it matches their node id and
//! forward otherwise, so clients may talk to any member.

use crate::error::ClusterError;
use crate::types::*;

#[tarpc::service]
pub trait WaggleCluster {
    /// Store a collection record on this node.
    async fn create_collection(
        req: CreateCollectionRequest,
    ) -> Result<CreateCollectionResponse, ClusterError>;

    /// List a user's collections.
    async fn list_collections(
        req: ListCollectionsRequest,
    ) -> Result<ListCollectionsResponse, ClusterError>;

    /// Fetch one collection record.
    async fn get_collection(
        req: GetCollectionRequest,
    ) -> Result<GetCollectionResponse, ClusterError>;

    /// Register a new shard on a collection.
    async fn create_shard(req: CreateShardRequest) -> Result<CreateShardResponse, ClusterError>;

    /// Insert points into a shard. Fails the batch on duplicate ids.
    async fn insert_points(req: InsertPointsRequest) -> Result<InsertPointsResponse, ClusterError>;

    /// Update points in a shard; ids not in the shard are skipped.
    async fn update_points(req: UpdatePointsRequest) -> Result<UpdatePointsResponse, ClusterError>;

    /// Delete points from a shard.
    async fn delete_points(req: DeletePointsRequest) -> Result<DeletePointsResponse, ClusterError>;

    /// Nearest-neighbour search in a shard.
    async fn search_points(req: SearchPointsRequest) -> Result<SearchPointsResponse, ClusterError>;

    /// Shard population and size statistics.
    async fn get_shard_info(req: GetShardInfoRequest)
        -> Result<GetShardInfoResponse, ClusterError>;
}
