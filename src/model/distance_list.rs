//! Bounded top-k neighbor accumulator

use crate::model::PointId;

/// Bounded, sorted top-k container for one query point's neighbors
///
/// Entries are kept sorted by distance, non-decreasing. Entries with equal
/// distance preserve the order of first insertion, so iteration order is
/// deterministic given a deterministic insertion order. The owning point is
/// itself a permitted neighbor; callers that want it excluded must filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceList {
    owner: PointId,
    capacity: usize,
    entries: Vec<(PointId, f64)>,
}

impl DistanceList {
    /// Create an empty list for `owner` holding at most `k` neighbors
    pub fn new(owner: PointId, k: usize) -> Self {
        Self {
            owner,
            capacity: k,
            entries: Vec::with_capacity(k.min(64)),
        }
    }

    /// Record a distance to `neighbor`
    ///
    /// If `neighbor` is already present, the smaller of the two distances
    /// wins; an equal or larger distance is a no-op. Otherwise the entry is
    /// inserted in sorted position (after existing entries with the same
    /// distance) and the largest-distance tail entry is dropped if the list
    /// now exceeds its capacity.
    pub fn add_distance(&mut self, neighbor: PointId, distance: f64) {
        if let Some(pos) = self.entries.iter().position(|&(id, _)| id == neighbor) {
            if distance >= self.entries[pos].1 {
                return;
            }
            self.entries.remove(pos);
            let at = self.insertion_point(distance);
            self.entries.insert(at, (neighbor, distance));
            return;
        }

        let at = self.insertion_point(distance);
        if at >= self.capacity {
            return;
        }
        self.entries.insert(at, (neighbor, distance));
        self.entries.truncate(self.capacity);
    }

    /// First index whose distance is strictly greater than `distance`
    fn insertion_point(&self, distance: f64) -> usize {
        self.entries.partition_point(|&(_, d)| d <= distance)
    }

    /// The query point this list belongs to
    pub fn owner(&self) -> PointId {
        self.owner
    }

    /// Maximum number of neighbors kept
    pub fn k(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by distance, non-decreasing; ties in first-seen order
    pub fn entries(&self) -> &[(PointId, f64)] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (PointId, f64)> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a DistanceList {
    type Item = &'a (PointId, f64);
    type IntoIter = std::slice::Iter<'a, (PointId, f64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
