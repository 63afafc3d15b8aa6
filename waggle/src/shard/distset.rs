//! Bounded working set of `(point, distance)` pairs.
//!
//! The graph algorithms need two views of the same candidates: constant-time
//! "is this id already known?" and an ordering by distance to a fixed query
//! vector. A [`DistSet`] keeps both — a membership set of ids and an array
//! ordered by ascending distance. Removal only touches the membership set;
//! the array entry is skipped lazily by [`DistSet::pop`]. The structure is
//! transient and single-threaded, sized to the search working set.

use crate::distance::DistFn;
use crate::shard::cache::CachePoint;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// One candidate: a cached point, its distance to the query, and whether the
/// greedy search has expanded it yet.
pub struct DistSetElem {
    pub point: Arc<CachePoint>,
    pub distance: f32,
    visited: bool,
}

pub struct DistSet {
    items: Vec<DistSetElem>,
    ids: HashSet<Uuid>,
    query: Vec<f32>,
    dist_fn: DistFn,
    // Pop cursor: everything before it has been consumed or skipped.
    cursor: usize,
}

impl DistSet {
    pub fn new(query: Vec<f32>, capacity: usize, dist_fn: DistFn) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            query,
            dist_fn,
            cursor: 0,
        }
    }

    /// Number of members (removed entries excluded).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    /// Add a point, computing its distance to the query once. Duplicate ids
    /// are ignored.
    pub fn add_point(&mut self, point: Arc<CachePoint>) {
        if !self.ids.insert(point.id()) {
            return;
        }
        let distance = (self.dist_fn)(point.vector(), &self.query);
        self.items.push(DistSetElem {
            point,
            distance,
            visited: false,
        });
    }

    pub fn add_points(&mut self, points: impl IntoIterator<Item = Arc<CachePoint>>) {
        for point in points {
            self.add_point(point);
        }
    }

    /// Add a point whose distance to the query is already known.
    pub fn add_elem(&mut self, point: Arc<CachePoint>, distance: f32) {
        if !self.ids.insert(point.id()) {
            return;
        }
        self.items.push(DistSetElem {
            point,
            distance,
            visited: false,
        });
    }

    /// Stable sort by ascending distance; ties keep insertion order.
    pub fn sort(&mut self) {
        self.items.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }

    /// Return the first element (in current order) not yet visited, marking
    /// it visited. `None` once every live element has been expanded.
    pub fn visit_next(&mut self) -> Option<(Arc<CachePoint>, f32)> {
        for elem in &mut self.items {
            if !elem.visited {
                elem.visited = true;
                return Some((Arc::clone(&elem.point), elem.distance));
            }
        }
        None
    }

    /// Pop the closest element still in the set, removing it from
    /// membership. Entries removed via [`DistSet::remove`] are skipped.
    pub fn pop(&mut self) -> Option<(Arc<CachePoint>, f32)> {
        while self.cursor < self.items.len() {
            let elem = &self.items[self.cursor];
            self.cursor += 1;
            if self.ids.remove(&elem.point.id()) {
                return Some((Arc::clone(&elem.point), elem.distance));
            }
        }
        None
    }

    /// Truncate to the first `k` elements in current order; the rest leave
    /// the membership set.
    pub fn keep_first_k(&mut self, k: usize) {
        for elem in self.items.iter().skip(k) {
            self.ids.remove(&elem.point.id());
        }
        self.items.truncate(k);
        self.cursor = self.cursor.min(self.items.len());
    }

    /// Remove an id from the membership set. The array entry stays behind
    /// and is skipped lazily.
    pub fn remove(&mut self, id: Uuid) {
        self.ids.remove(&id);
    }

    /// Remaining elements in current order, including lazily removed ones;
    /// callers filter through [`DistSet::contains`].
    pub fn items(&self) -> &[DistSetElem] {
        &self.items[self.cursor..]
    }
}
