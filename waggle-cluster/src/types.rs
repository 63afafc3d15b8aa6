//! RPC request and response types.
//!
//! Every request is destination-addressed: `RequestArgs` names the sending
//! and the intended receiving node, and a node that receives a request for a
//! different destination forwards it. Payloads are bincode-encoded by the
//! transport; the same encoding is used for catalog records, so collection
//! bytes are identical at rest and on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waggle::{Collection, Point, SearchPoint};

/// Routing envelope carried by every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestArgs {
    /// Node that originated the request.
    pub source: String,
    /// Node that should execute it.
    pub dest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub args: RequestArgs,
    pub collection: Collection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollectionResponse {
    pub already_exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCollectionsRequest {
    pub args: RequestArgs,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCollectionsResponse {
    pub collections: Vec<Collection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCollectionRequest {
    pub args: RequestArgs,
    pub user_id: String,
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCollectionResponse {
    /// `None` when the collection does not exist.
    pub collection: Option<Collection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShardRequest {
    pub args: RequestArgs,
    pub user_id: String,
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShardResponse {
    pub shard_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertPointsRequest {
    pub args: RequestArgs,
    pub user_id: String,
    pub collection_id: String,
    pub shard_id: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertPointsResponse {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePointsRequest {
    pub args: RequestArgs,
    pub user_id: String,
    pub collection_id: String,
    pub shard_id: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePointsResponse {
    pub updated_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePointsRequest {
    pub args: RequestArgs,
    pub user_id: String,
    pub collection_id: String,
    pub shard_id: String,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePointsResponse {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPointsRequest {
    pub args: RequestArgs,
    pub user_id: String,
    pub collection_id: String,
    pub shard_id: String,
    pub vector: Vec<f32>,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPointsResponse {
    pub points: Vec<SearchPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetShardInfoRequest {
    pub args: RequestArgs,
    pub user_id: String,
    pub collection_id: String,
    pub shard_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetShardInfoResponse {
    pub point_count: i64,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use waggle::DistanceMetric;

    #[test]
    fn test_request_bincode_roundtrip() {
        let request = InsertPointsRequest {
            args: RequestArgs {
                source: "a:1".into(),
                dest: "b:2".into(),
            },
            user_id: "alice".into(),
            collection_id: "photos".into(),
            shard_id: "s1".into(),
            points: vec![Point {
                id: Uuid::new_v4(),
                vector: vec![0.1, -0.2],
                metadata: Some(vec![9, 8]),
            }],
        };
        let bytes = bincode::serialize(&request).unwrap();
        let decoded: InsertPointsRequest = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.args.dest, "b:2");
        assert_eq!(decoded.points, request.points);
    }

    #[test]
    fn test_collection_response_roundtrip() {
        let response = GetCollectionResponse {
            collection: Some(Collection {
                id: "photos".into(),
                user_id: "alice".into(),
                vector_size: 128,
                distance_metric: DistanceMetric::Cosine,
                shard_ids: vec!["s1".into(), "s2".into()],
                parameters: Default::default(),
            }),
        };
        let bytes = bincode::serialize(&response).unwrap();
        let decoded: GetCollectionResponse = bincode::deserialize(&bytes).unwrap();
        let collection = decoded.collection.unwrap();
        assert_eq!(collection.shard_ids.len(), 2);
        assert_eq!(collection.distance_metric, DistanceMetric::Cosine);
    }
}
