//! Greedy search and robust prune over the proximity graph.
//!
//! Both algorithms run against a per-transaction [`PointCache`] and a fixed
//! distance function. Greedy search is a best-first traversal from the entry
//! point that maintains a working set of the `search_size` closest
//! candidates; robust prune selects up to `degree_bound` edges for a point,
//! keeping a candidate only when it points in a sufficiently different
//! direction (factor `alpha`) from everything already chosen.

use crate::distance::DistFn;
use crate::error::{Error, Result};
use crate::shard::cache::{CachePoint, PointCache};
use crate::shard::distset::DistSet;
use crate::shard::store::BucketRead;
use std::sync::Arc;
use uuid::Uuid;

/// Best-first traversal from `start_id` towards `query`.
///
/// Returns the search working set (the `search_size` closest candidates
/// found) and the visited set (every expanded point, sorted by distance).
/// The visited set is what robust prune feeds on during insertion.
pub fn greedy_search<B: BucketRead>(
    cache: &PointCache<'_, B>,
    start_id: Uuid,
    query: &[f32],
    k: usize,
    search_size: usize,
    dist_fn: DistFn,
) -> Result<(DistSet, DistSet)> {
    if search_size < k {
        return Err(Error::InvalidParameter(format!(
            "search size ({search_size}) must be at least k ({k})"
        )));
    }
    let mut search_set = DistSet::new(query.to_vec(), search_size * 2, dist_fn);
    let mut visited_set = DistSet::new(query.to_vec(), search_size * 2, dist_fn);

    let start = cache.get_point(start_id)?;
    search_set.add_point(start);

    /* The working set curates the closest points seen so far; the loop ends
     * once every element in it has been expanded. Expanding a point pulls in
     * its neighbours, re-sorts, and truncates back to search_size, so each
     * iteration either visits a new point or shrinks the frontier. */
    while let Some((point, distance)) = search_set.visit_next() {
        visited_set.add_elem(Arc::clone(&point), distance);
        let neighbours = cache.get_neighbours(&point)?;
        search_set.add_points(neighbours);
        search_set.sort();
        if search_set.len() > search_size {
            search_set.keep_first_k(search_size);
        }
    }

    visited_set.sort();
    Ok((search_set, visited_set))
}

/// Select a new edge list of at most `degree_bound` edges for `point` from
/// `candidates`, and install it on the point.
///
/// The point's current neighbours join the candidate pool first, so pruning
/// never forgets an existing good edge. After picking the closest remaining
/// candidate `c`, every candidate `x` with
/// `alpha * d(c, x) <= d(point, x)` is dropped: `c` already covers that
/// direction.
pub fn robust_prune<B: BucketRead>(
    cache: &PointCache<'_, B>,
    point: &Arc<CachePoint>,
    candidates: &mut DistSet,
    alpha: f32,
    degree_bound: usize,
    dist_fn: DistFn,
) -> Result<()> {
    let current = cache.get_neighbours(point)?;
    candidates.add_points(current);
    candidates.sort();
    candidates.remove(point.id());

    let mut new_neighbours: Vec<Arc<CachePoint>> = Vec::with_capacity(degree_bound);
    while let Some((closest, _)) = candidates.pop() {
        new_neighbours.push(Arc::clone(&closest));
        if new_neighbours.len() >= degree_bound {
            break;
        }
        let mut covered = Vec::new();
        for elem in candidates.items() {
            let id = elem.point.id();
            if !candidates.contains(id) {
                continue;
            }
            if alpha * dist_fn(closest.vector(), elem.point.vector()) <= elem.distance {
                covered.push(id);
            }
        }
        for id in covered {
            candidates.remove(id);
        }
    }

    cache.set_edges(point, new_neighbours);
    Ok(())
}
