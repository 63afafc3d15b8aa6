//! A shard: one persistent vector index over a subset of a collection.
//!
//! Each shard owns one embedded store file and maintains a Vamana-style
//! proximity graph over its points. Every operation acquires exactly one
//! store transaction, builds a fresh point cache over it, runs the graph
//! algorithms against the cache, and flushes the cache back into the same
//! transaction before commit — so an error anywhere rolls the whole
//! operation back.
//!
//! The graph is seeded by a synthetic entry point with a random unit vector.
//! It is created on first open, never returned to callers, and never
//! deleted; greedy search always starts from it.

mod cache;
mod codec;
mod distset;
mod graph;
mod store;

pub use cache::{CachePoint, PointCache};
pub use codec::{scan_point_edges, ShardPoint};
pub use distset::{DistSet, DistSetElem};
pub use store::{
    BucketRead, BucketStats, ReadTxn, ShardStore, WriteTxn, DB_FILE_NAME, OPEN_TIMEOUT,
};

use crate::collection::{Collection, Point, SearchPoint};
use crate::distance::DistFn;
use crate::error::{Error, Result};
use rand::Rng;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use store::{POINT_COUNT_KEY, START_ID_KEY};
use tracing::debug;
use uuid::Uuid;

/// Size and population statistics for a shard.
#[derive(Debug, Clone, Copy)]
pub struct ShardInfo {
    /// Number of user points (the entry point is excluded).
    pub point_count: i64,
    /// Bytes allocated in the store file for the points bucket.
    pub allocated_bytes: u64,
    /// Bytes in active use by the points bucket.
    pub in_use_bytes: u64,
}

pub struct Shard {
    store: ShardStore,
    collection: Collection,
    dist_fn: DistFn,
    start_id: Uuid,
}

impl Shard {
    /// Open the shard under `shard_dir`, creating the store and the entry
    /// point on first open. Blocks up to [`OPEN_TIMEOUT`] on the store's
    /// file lock.
    pub fn open(shard_dir: &Path, collection: Collection) -> Result<Self> {
        if collection.vector_size == 0 {
            return Err(Error::InvalidParameter(
                "collection vector size must be at least 1".into(),
            ));
        }
        let store = ShardStore::open(shard_dir)?;
        let txn = store.begin_write()?;
        let start_id = match txn.get_internal(START_ID_KEY)? {
            Some(bytes) => {
                let id = codec::decode_uuid(&bytes)?;
                debug!(id = %id, "found shard entry point");
                id
            }
            None => {
                let entry = ShardPoint {
                    id: Uuid::new_v4(),
                    vector: random_unit_vector(collection.vector_size),
                    metadata: None,
                    edges: Vec::new(),
                };
                codec::set_point(&txn, &entry)?;
                txn.put_internal(START_ID_KEY, entry.id.as_bytes())?;
                txn.put_internal(POINT_COUNT_KEY, &codec::encode_point_count(0))?;
                debug!(id = %entry.id, "created shard entry point");
                entry.id
            }
        };
        txn.commit()?;
        let dist_fn = collection.distance_metric.dist_fn();
        Ok(Self {
            store,
            collection,
            dist_fn,
            start_id,
        })
    }

    /// The collection this shard belongs to.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Read-only population and size statistics.
    pub fn info(&self) -> Result<ShardInfo> {
        let txn = self.store.begin_read()?;
        let point_count = match txn.get_internal(POINT_COUNT_KEY)? {
            Some(bytes) => codec::decode_point_count(&bytes)?,
            None => 0,
        };
        let stats = txn.points_stats()?;
        Ok(ShardInfo {
            point_count,
            allocated_bytes: stats.allocated_bytes,
            in_use_bytes: stats.in_use_bytes,
        })
    }

    /// Insert new points. Fails the whole batch with [`Error::AlreadyExists`]
    /// if any id is already present; nothing is persisted in that case.
    pub fn insert_points(&self, points: Vec<Point>) -> Result<usize> {
        for point in &points {
            self.check_vector(&point.vector)?;
        }
        if points.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();
        let count = points.len();
        let txn = self.store.begin_write()?;
        let cache = PointCache::new(&txn);
        for point in points {
            match cache.get_point(point.id) {
                Ok(_) => return Err(Error::AlreadyExists(format!("point {}", point.id))),
                Err(Error::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
            self.insert_single_point(
                &cache,
                ShardPoint {
                    id: point.id,
                    vector: point.vector,
                    metadata: point.metadata,
                    edges: Vec::new(),
                },
            )?;
        }
        self.bump_point_count(&txn, count as i64)?;
        cache.flush(&txn)?;
        txn.commit()?;
        debug!(count, duration = ?started.elapsed(), "inserted points");
        Ok(count)
    }

    /// Update existing points in place: the vector and metadata are replaced
    /// and the point's edges are rebuilt. Ids not present in this shard are
    /// skipped silently (they belong to a sibling shard). Returns the ids
    /// actually updated.
    pub fn update_points(&self, points: Vec<Point>) -> Result<Vec<Uuid>> {
        for point in &points {
            self.check_vector(&point.vector)?;
        }
        let started = Instant::now();
        let txn = self.store.begin_write()?;
        let cache = PointCache::new(&txn);
        let mut updated = Vec::with_capacity(points.len());
        for point in points {
            let existing = match cache.get_point(point.id) {
                Ok(existing) => existing,
                Err(Error::NotFound(_)) => {
                    debug!(id = %point.id, "update skipping point not in this shard");
                    continue;
                }
                Err(err) => return Err(err),
            };
            // Detach the stale version: every neighbour re-selects its edges
            // with this point excluded, then the new version is inserted as
            // if fresh.
            let stale: HashSet<Uuid> = [point.id].into_iter().collect();
            for edge_id in existing.edge_ids() {
                self.prune_delete_neighbour(&cache, edge_id, &stale)?;
            }
            self.insert_single_point(
                &cache,
                ShardPoint {
                    id: point.id,
                    vector: point.vector,
                    metadata: point.metadata,
                    edges: Vec::new(),
                },
            )?;
            updated.push(point.id);
        }
        cache.flush(&txn)?;
        txn.commit()?;
        debug!(count = updated.len(), duration = ?started.elapsed(), "updated points");
        Ok(updated)
    }

    /// Delete points by id. Ids not present are skipped; the entry point is
    /// never deleted. Neighbours of deleted points have their edges repaired
    /// to route past the removed nodes. Returns the ids actually deleted.
    pub fn delete_points(&self, delete_set: &HashSet<Uuid>) -> Result<Vec<Uuid>> {
        let started = Instant::now();
        let txn = self.store.begin_write()?;
        let cache = PointCache::new(&txn);
        let mut deleted = Vec::with_capacity(delete_set.len());
        let mut to_prune: HashSet<Uuid> = HashSet::new();
        for &id in delete_set {
            if id == self.start_id {
                debug!(id = %id, "refusing to delete the entry point");
                continue;
            }
            let point = match cache.get_point(id) {
                Ok(point) => point,
                Err(Error::NotFound(_)) => {
                    debug!(id = %id, "delete skipping absent point");
                    continue;
                }
                Err(err) => return Err(err),
            };
            point.mark_deleted();
            deleted.push(id);
            for edge_id in point.edge_ids() {
                if !delete_set.contains(&edge_id) {
                    to_prune.insert(edge_id);
                }
            }
        }
        for &id in &to_prune {
            self.prune_delete_neighbour(&cache, id, delete_set)?;
        }
        if !deleted.is_empty() {
            self.bump_point_count(&txn, -(deleted.len() as i64))?;
        }
        cache.flush(&txn)?;
        txn.commit()?;
        debug!(count = deleted.len(), duration = ?started.elapsed(), "deleted points");
        Ok(deleted)
    }

    /// Approximate nearest-neighbour search: the `k` closest user points to
    /// `query`, ascending by distance. The entry point is filtered out.
    pub fn search_points(&self, query: &[f32], k: usize) -> Result<Vec<SearchPoint>> {
        self.check_vector(query)?;
        let params = self.collection.parameters;
        let txn = self.store.begin_read()?;
        let cache = PointCache::new(&txn);
        let (mut search_set, _) = graph::greedy_search(
            &cache,
            self.start_id,
            query,
            k,
            params.search_size,
            self.dist_fn,
        )?;
        // One extra slot so the entry point can be filtered without
        // shrinking the result below k.
        search_set.keep_first_k(k.saturating_add(1));
        let mut results = Vec::with_capacity(k);
        for elem in search_set.items() {
            if results.len() == k {
                break;
            }
            if elem.point.id() == self.start_id {
                continue;
            }
            // Metadata bytes must outlive the transaction: the cache hands
            // out an owned copy.
            let metadata = cache.get_metadata(&elem.point)?;
            results.push(SearchPoint {
                point: Point {
                    id: elem.point.id(),
                    vector: elem.point.vector().to_vec(),
                    metadata,
                },
                distance: elem.distance,
            });
        }
        Ok(results)
    }

    fn insert_single_point<B: BucketRead>(
        &self,
        cache: &PointCache<'_, B>,
        point: ShardPoint,
    ) -> Result<()> {
        let params = self.collection.parameters;
        let point = cache.set_point(point)?;
        let (_, mut visited) = graph::greedy_search(
            cache,
            self.start_id,
            point.vector(),
            1,
            params.search_size,
            self.dist_fn,
        )?;
        graph::robust_prune(
            cache,
            &point,
            &mut visited,
            params.alpha,
            params.degree_bound,
            self.dist_fn,
        )?;
        // Record the reverse direction of every selected edge so the graph
        // stays navigable from both endpoints.
        for neighbour_id in point.edge_ids() {
            let neighbour = cache.get_point(neighbour_id)?;
            if neighbour.edge_count() + 1 > params.degree_bound {
                // The neighbour is full: re-select its edges with the new
                // point in the running.
                let current = cache.get_neighbours(&neighbour)?;
                let mut candidates =
                    DistSet::new(neighbour.vector().to_vec(), current.len() + 1, self.dist_fn);
                candidates.add_points(current);
                candidates.add_point(Arc::clone(&point));
                candidates.sort();
                graph::robust_prune(
                    cache,
                    &neighbour,
                    &mut candidates,
                    params.alpha,
                    params.degree_bound,
                    self.dist_fn,
                )?;
            } else {
                cache.add_neighbour(&neighbour, &point);
            }
        }
        Ok(())
    }

    /// Re-select the edges of `id` while the members of `delete_set` are
    /// going away: doomed neighbours are substituted by their own neighbours
    /// so connectivity survives past the removed nodes.
    fn prune_delete_neighbour<B: BucketRead>(
        &self,
        cache: &PointCache<'_, B>,
        id: Uuid,
        delete_set: &HashSet<Uuid>,
    ) -> Result<()> {
        let params = self.collection.parameters;
        let point = cache.get_point(id)?;
        let neighbours = cache.get_neighbours(&point)?;
        let mut candidates = DistSet::new(
            point.vector().to_vec(),
            neighbours.len() * 2,
            self.dist_fn,
        );
        let mut live = Vec::with_capacity(point.edge_count());
        for neighbour in neighbours {
            if delete_set.contains(&neighbour.id()) {
                for substitute in cache.get_neighbours(&neighbour)? {
                    if !delete_set.contains(&substitute.id()) {
                        candidates.add_point(substitute);
                    }
                }
            } else {
                candidates.add_point(Arc::clone(&neighbour));
                live.push(neighbour);
            }
        }
        // Detach the doomed edges before pruning: robust prune merges the
        // point's current neighbours back in, and a committed delete must
        // not leave an edge to a removed point.
        cache.set_edges(&point, live);
        candidates.sort();
        graph::robust_prune(
            cache,
            &point,
            &mut candidates,
            params.alpha,
            params.degree_bound,
            self.dist_fn,
        )?;
        Ok(())
    }

    fn bump_point_count(&self, txn: &WriteTxn, delta: i64) -> Result<()> {
        let current = match txn.get_internal(POINT_COUNT_KEY)? {
            Some(bytes) => codec::decode_point_count(&bytes)?,
            None => 0,
        };
        txn.put_internal(POINT_COUNT_KEY, &codec::encode_point_count(current + delta))
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.collection.vector_size {
            return Err(Error::InvalidParameter(format!(
                "vector has {} dimensions, collection expects {}",
                vector.len(),
                self.collection.vector_size
            )));
        }
        Ok(())
    }
}

/// Random vector with components in [-1, 1], normalized to unit length.
fn random_unit_vector(size: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    loop {
        let vector: Vec<f32> = (0..size).map(|_| rng.gen_range(-1.0f32..=1.0)).collect();
        let norm: f32 = vector.iter().map(|c| c * c).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            return vector.into_iter().map(|c| c / norm).collect();
        }
        // Degenerate all-zero sample: try again.
    }
}
