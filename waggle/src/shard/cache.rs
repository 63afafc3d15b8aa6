//! Per-transaction point cache.
//!
//! One cache is scoped to one store transaction: it lazily loads points from
//! the `points` bucket, tracks what changed, and writes everything back in a
//! single [`PointCache::flush`] before commit. Caches are never shared across
//! transactions, so memory stays bounded by the operation's working set and
//! readers never observe another transaction's cache.
//!
//! Each point carries two fine-grained locks rather than the cache owning one
//! big one: a load lock guarding the one-time resolution of edge ids into
//! cached neighbours, and an edge lock taken shared by traversals and
//! exclusively by mutations. If two writers could read a point's edges
//! unlocked, both could observe "no neighbours yet" and race to create the
//! first connection, leaving the graph disconnected.

use crate::error::{Error, Result};
use crate::shard::codec::{self, ShardPoint};
use crate::shard::store::{BucketRead, WriteTxn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

enum MetadataSlot {
    Unloaded,
    Loaded(Option<Vec<u8>>),
}

struct EdgeState {
    edges: Vec<Uuid>,
    neighbours: Vec<Arc<CachePoint>>,
    neighbours_loaded: bool,
}

/// A point resident in the cache. Identity and vector are immutable; edges,
/// metadata and the dirty flags are guarded per-point.
pub struct CachePoint {
    id: Uuid,
    vector: Vec<f32>,
    metadata: Mutex<MetadataSlot>,
    edge_state: RwLock<EdgeState>,
    load_lock: Mutex<()>,
    is_dirty: AtomicBool,
    is_edge_dirty: AtomicBool,
    is_deleted: AtomicBool,
}

impl CachePoint {
    fn new(point: ShardPoint, dirty: bool) -> Self {
        let metadata = match (dirty, point.metadata) {
            // A freshly written point knows its metadata; a loaded one
            // fetches it lazily.
            (true, metadata) => MetadataSlot::Loaded(metadata),
            (false, Some(metadata)) => MetadataSlot::Loaded(Some(metadata)),
            (false, None) => MetadataSlot::Unloaded,
        };
        Self {
            id: point.id,
            vector: point.vector,
            metadata: Mutex::new(metadata),
            edge_state: RwLock::new(EdgeState {
                edges: point.edges,
                neighbours: Vec::new(),
                neighbours_loaded: false,
            }),
            load_lock: Mutex::new(()),
            is_dirty: AtomicBool::new(dirty),
            is_edge_dirty: AtomicBool::new(false),
            is_deleted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    /// Snapshot of the current edge ids.
    pub fn edge_ids(&self) -> Vec<Uuid> {
        self.edge_state.read().edges.clone()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_state.read().edges.len()
    }

    pub fn mark_deleted(&self) {
        self.is_deleted.store(true, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted.load(Ordering::Acquire)
    }
}

/// In-memory cache over one transaction's `points` bucket.
pub struct PointCache<'a, B: BucketRead> {
    bucket: &'a B,
    points: Mutex<HashMap<Uuid, Arc<CachePoint>>>,
}

impl<'a, B: BucketRead> PointCache<'a, B> {
    pub fn new(bucket: &'a B) -> Self {
        Self {
            bucket,
            points: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a point, loading vector and edges from the bucket on first use.
    pub fn get_point(&self, id: Uuid) -> Result<Arc<CachePoint>> {
        if let Some(point) = self.points.lock().get(&id) {
            return Ok(Arc::clone(point));
        }
        let loaded = codec::get_point(self.bucket, id)?;
        let point = Arc::new(CachePoint::new(loaded, false));
        // Another thread may have loaded the same point concurrently; keep
        // whichever entered the map first so everyone shares one instance.
        let mut points = self.points.lock();
        let entry = points.entry(id).or_insert(point);
        Ok(Arc::clone(entry))
    }

    /// Insert a new point (or overwrite an existing id in place), marked
    /// dirty for the next flush.
    pub fn set_point(&self, point: ShardPoint) -> Result<Arc<CachePoint>> {
        if point.id.is_nil() {
            return Err(Error::InvalidParameter("point id cannot be nil".into()));
        }
        let cached = Arc::new(CachePoint::new(point, true));
        self.points.lock().insert(cached.id, Arc::clone(&cached));
        Ok(cached)
    }

    /// Resolve a point's edges into cached neighbours, loading them once
    /// under the point's load lock, and return a snapshot.
    pub fn get_neighbours(&self, point: &Arc<CachePoint>) -> Result<Vec<Arc<CachePoint>>> {
        {
            let state = point.edge_state.read();
            if state.neighbours_loaded {
                return Ok(state.neighbours.clone());
            }
        }
        let _load_guard = point.load_lock.lock();
        // Double-check after acquiring the load lock: a concurrent loader may
        // have resolved the neighbours while we waited.
        {
            let state = point.edge_state.read();
            if state.neighbours_loaded {
                return Ok(state.neighbours.clone());
            }
        }
        let edge_ids = point.edge_ids();
        let mut neighbours = Vec::with_capacity(edge_ids.len());
        for edge_id in edge_ids {
            neighbours.push(self.get_point(edge_id)?);
        }
        let mut state = point.edge_state.write();
        state.neighbours = neighbours.clone();
        state.neighbours_loaded = true;
        Ok(neighbours)
    }

    /// Append a bi-directional edge endpoint: `neighbour` gains an edge to
    /// `point`. The caller is expected to have already recorded the reverse
    /// direction on `point`'s own edge list.
    pub fn add_neighbour(&self, neighbour: &Arc<CachePoint>, point: &Arc<CachePoint>) {
        let mut state = neighbour.edge_state.write();
        state.edges.push(point.id());
        if state.neighbours_loaded {
            state.neighbours.push(Arc::clone(point));
        }
        neighbour.is_edge_dirty.store(true, Ordering::Release);
    }

    /// Replace a point's edge list with the given neighbours.
    pub fn set_edges(&self, point: &Arc<CachePoint>, neighbours: Vec<Arc<CachePoint>>) {
        let mut state = point.edge_state.write();
        state.edges = neighbours.iter().map(|n| n.id()).collect();
        state.neighbours = neighbours;
        state.neighbours_loaded = true;
        point.is_edge_dirty.store(true, Ordering::Release);
    }

    /// Fetch a point's metadata, loading it lazily. The returned bytes are an
    /// owned copy, independent of the transaction.
    pub fn get_metadata(&self, point: &Arc<CachePoint>) -> Result<Option<Vec<u8>>> {
        let mut slot = point.metadata.lock();
        if let MetadataSlot::Loaded(metadata) = &*slot {
            return Ok(metadata.clone());
        }
        let metadata = codec::get_point_metadata(self.bucket, point.id())?;
        *slot = MetadataSlot::Loaded(metadata.clone());
        Ok(metadata)
    }

    /// Number of points currently resident.
    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }

    /// Write every change back into the transaction: deleted points are
    /// removed, dirty points fully rewritten, edge-dirty points get only
    /// their edge entry rewritten. Runs on the single writer; nothing else
    /// observes the cache during flush.
    pub fn flush(&self, txn: &WriteTxn) -> Result<()> {
        let mut points = self.points.lock();
        let mut dropped = Vec::new();
        for (id, point) in points.iter() {
            if point.is_deleted() {
                codec::delete_point(txn, *id)?;
                dropped.push(*id);
                continue;
            }
            if point.is_dirty.load(Ordering::Acquire) {
                let metadata = match &*point.metadata.lock() {
                    MetadataSlot::Loaded(metadata) => metadata.clone(),
                    // Dirty points are created through set_point, which
                    // always records metadata; a bare edge rewrite would not
                    // reach this branch.
                    MetadataSlot::Unloaded => codec::get_point_metadata(self.bucket, *id)?,
                };
                let record = ShardPoint {
                    id: *id,
                    vector: point.vector.clone(),
                    metadata,
                    edges: point.edge_ids(),
                };
                codec::set_point(txn, &record)?;
                point.is_dirty.store(false, Ordering::Release);
                point.is_edge_dirty.store(false, Ordering::Release);
                continue;
            }
            if point.is_edge_dirty.load(Ordering::Acquire) {
                codec::set_point_edges(txn, *id, &point.edge_ids())?;
                point.is_edge_dirty.store(false, Ordering::Release);
            }
        }
        for id in dropped {
            points.remove(&id);
        }
        Ok(())
    }
}
