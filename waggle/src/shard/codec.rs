//! On-disk layout of points inside the `points` bucket.
//!
//! Each point owns up to three sub-entries, keyed by its 16-byte UUID plus a
//! one-byte suffix:
//!
//! ```text
//! <uuid>v  -> vector, little-endian f32 array
//! <uuid>m  -> metadata, raw bytes (absent when the point has none)
//! <uuid>e  -> edge list, concatenated 16-byte UUIDs
//! ```
//!
//! Absence of the `v` entry means the point does not exist. The `internal`
//! bucket stores the entry-point UUID under `startId` and the user-point
//! counter under `pointCount` as a signed 64-bit little-endian integer.

use crate::error::{Error, Result};
use crate::shard::store::{BucketRead, WriteTxn};
use std::collections::HashSet;
use uuid::Uuid;

const SUFFIX_VECTOR: u8 = b'v';
const SUFFIX_METADATA: u8 = b'm';
const SUFFIX_EDGES: u8 = b'e';

const KEY_LEN: usize = 17;

/// The persistent form of a point: identity, vector, metadata, edge list.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub metadata: Option<Vec<u8>>,
    pub edges: Vec<Uuid>,
}

fn entry_key(id: Uuid, suffix: u8) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..16].copy_from_slice(id.as_bytes());
    key[16] = suffix;
    key
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vector.len() * 4);
    for component in vector {
        buf.extend_from_slice(&component.to_le_bytes());
    }
    buf
}

pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Corrupted(format!(
            "vector entry length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn encode_edges(edges: &[Uuid]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(edges.len() * 16);
    for edge in edges {
        buf.extend_from_slice(edge.as_bytes());
    }
    buf
}

pub fn decode_edges(bytes: &[u8]) -> Result<Vec<Uuid>> {
    if bytes.len() % 16 != 0 {
        return Err(Error::Corrupted(format!(
            "edge entry length {} is not a multiple of 16",
            bytes.len()
        )));
    }
    bytes
        .chunks_exact(16)
        .map(|chunk| {
            Uuid::from_slice(chunk).map_err(|err| Error::Corrupted(format!("bad edge id: {err}")))
        })
        .collect()
}

pub fn encode_point_count(count: i64) -> [u8; 8] {
    count.to_le_bytes()
}

pub fn decode_point_count(bytes: &[u8]) -> Result<i64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Corrupted(format!("point count entry has length {}", bytes.len())))?;
    Ok(i64::from_le_bytes(arr))
}

pub fn decode_uuid(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|err| Error::Corrupted(format!("bad uuid entry: {err}")))
}

/// Read a point's vector and edges. Metadata is left to lazy loading.
pub fn get_point<B: BucketRead>(bucket: &B, id: Uuid) -> Result<ShardPoint> {
    let vector_bytes = bucket
        .get(&entry_key(id, SUFFIX_VECTOR))?
        .ok_or_else(|| Error::NotFound(format!("point {id}")))?;
    let vector = decode_vector(&vector_bytes)?;
    let edges = match bucket.get(&entry_key(id, SUFFIX_EDGES))? {
        Some(bytes) => decode_edges(&bytes)?,
        None => Vec::new(),
    };
    Ok(ShardPoint {
        id,
        vector,
        metadata: None,
        edges,
    })
}

/// Read a point's metadata entry. `None` when the point has none.
pub fn get_point_metadata<B: BucketRead>(bucket: &B, id: Uuid) -> Result<Option<Vec<u8>>> {
    bucket.get(&entry_key(id, SUFFIX_METADATA))
}

/// Write all sub-entries of a point. A missing metadata field removes any
/// previously stored metadata entry.
pub fn set_point(txn: &WriteTxn, point: &ShardPoint) -> Result<()> {
    txn.put(&entry_key(point.id, SUFFIX_VECTOR), &encode_vector(&point.vector))?;
    match &point.metadata {
        Some(metadata) => txn.put(&entry_key(point.id, SUFFIX_METADATA), metadata)?,
        None => txn.delete(&entry_key(point.id, SUFFIX_METADATA))?,
    }
    txn.put(&entry_key(point.id, SUFFIX_EDGES), &encode_edges(&point.edges))?;
    Ok(())
}

/// Rewrite only the edge entry of a point.
pub fn set_point_edges(txn: &WriteTxn, id: Uuid, edges: &[Uuid]) -> Result<()> {
    txn.put(&entry_key(id, SUFFIX_EDGES), &encode_edges(edges))
}

/// Remove every sub-entry of a point.
pub fn delete_point(txn: &WriteTxn, id: Uuid) -> Result<()> {
    txn.delete(&entry_key(id, SUFFIX_VECTOR))?;
    txn.delete(&entry_key(id, SUFFIX_METADATA))?;
    txn.delete(&entry_key(id, SUFFIX_EDGES))?;
    Ok(())
}

/// Scan every edge list in the bucket and collect the ids of points that
/// still reference a member of `delete_set`. Used for orphan detection.
pub fn scan_point_edges<B: BucketRead>(bucket: &B, delete_set: &HashSet<Uuid>) -> Result<Vec<Uuid>> {
    let mut referencing = Vec::new();
    bucket.for_each_point_entry(&mut |key, value| {
        if key.len() != KEY_LEN || key[16] != SUFFIX_EDGES {
            return Ok(());
        }
        let id = decode_uuid(&key[..16])?;
        if delete_set.contains(&id) {
            return Ok(());
        }
        for chunk in value.chunks_exact(16) {
            let edge = decode_uuid(chunk)?;
            if delete_set.contains(&edge) {
                referencing.push(id);
                break;
            }
        }
        Ok(())
    })?;
    Ok(referencing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::store::ShardStore;
    use tempfile::tempdir;

    fn sample_point(metadata: Option<&[u8]>) -> ShardPoint {
        ShardPoint {
            id: Uuid::new_v4(),
            vector: vec![0.25, -1.5, 3.0],
            metadata: metadata.map(|m| m.to_vec()),
            edges: vec![Uuid::new_v4(), Uuid::new_v4()],
        }
    }

    #[test]
    fn test_vector_roundtrip() {
        let vector = vec![1.0f32, -0.5, f32::MIN_POSITIVE, 1e30];
        assert_eq!(decode_vector(&encode_vector(&vector)).unwrap(), vector);
    }

    #[test]
    fn test_vector_bad_length() {
        assert!(matches!(
            decode_vector(&[0u8; 5]),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_edges_roundtrip() {
        let edges = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        assert_eq!(decode_edges(&encode_edges(&edges)).unwrap(), edges);
        assert!(decode_edges(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_point_count_roundtrip() {
        for count in [0i64, 1, -1, i64::MAX] {
            assert_eq!(decode_point_count(&encode_point_count(count)).unwrap(), count);
        }
        assert!(decode_point_count(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_set_get_point() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();
        let point = sample_point(Some(b"tags"));

        let txn = store.begin_write().unwrap();
        set_point(&txn, &point).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let loaded = get_point(&txn, point.id).unwrap();
        assert_eq!(loaded.vector, point.vector);
        assert_eq!(loaded.edges, point.edges);
        // Metadata is not loaded by get_point.
        assert!(loaded.metadata.is_none());
        assert_eq!(
            get_point_metadata(&txn, point.id).unwrap().unwrap(),
            b"tags"
        );
    }

    #[test]
    fn test_missing_point_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();
        let txn = store.begin_read().unwrap();
        assert!(matches!(
            get_point(&txn, Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_set_point_clears_stale_metadata() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();
        let mut point = sample_point(Some(b"old"));

        let txn = store.begin_write().unwrap();
        set_point(&txn, &point).unwrap();
        point.metadata = None;
        set_point(&txn, &point).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        assert!(get_point_metadata(&txn, point.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_point_removes_all_entries() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();
        let point = sample_point(Some(b"m"));

        let txn = store.begin_write().unwrap();
        set_point(&txn, &point).unwrap();
        delete_point(&txn, point.id).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        assert!(matches!(
            get_point(&txn, point.id),
            Err(Error::NotFound(_))
        ));
        assert!(get_point_metadata(&txn, point.id).unwrap().is_none());
    }

    #[test]
    fn test_scan_point_edges_finds_referencers() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();

        let doomed = Uuid::new_v4();
        let mut pointer = sample_point(None);
        pointer.edges = vec![doomed];
        let bystander = ShardPoint {
            id: Uuid::new_v4(),
            vector: vec![0.0],
            metadata: None,
            edges: vec![pointer.id],
        };

        let txn = store.begin_write().unwrap();
        set_point(&txn, &pointer).unwrap();
        set_point(&txn, &bystander).unwrap();
        txn.commit().unwrap();

        let delete_set: HashSet<Uuid> = [doomed].into_iter().collect();
        let txn = store.begin_read().unwrap();
        let found = scan_point_edges(&txn, &delete_set).unwrap();
        assert_eq!(found, vec![pointer.id]);
    }
}
