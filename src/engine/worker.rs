//! Per-pairing compute loop
//!
//! One worker invocation scores the full cross product of a pairing and
//! materializes a [`DistanceList`] per left-side point into a fresh result
//! tree. Self-pairings take one pass `(A, A)`; cross pairings take two,
//! `(A, B)` then `(B, A)`, because top-k is asymmetric: every point on
//! either side needs neighbors drawn from the other.

use crate::distance::DistanceMetric;
use crate::model::{DistanceList, Partition, Point, PointId, TreeHandle};
use crate::storage::{BufferedStorage, DirectStorage, DistanceListSerializer};
use crate::tree::DynamicBPlusTree;
use crate::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The tree type produced for every pairing: buffered directory, direct
/// data file, distance-list payloads
pub type ResultTree =
    DynamicBPlusTree<BufferedStorage, DirectStorage, DistanceList, DistanceListSerializer>;

/// Everything a worker needs to process one pairing, resolved up front so
/// workers never touch the shared descriptor while scanning
#[derive(Debug, Clone)]
pub(crate) struct TaskSpec {
    /// Index of the pairing in the package descriptor
    pub pairing_index: usize,

    /// 1-based id among the tasks scheduled this run (skipped pairings
    /// don't get one)
    pub task_id: usize,

    pub left_id: u32,
    pub left_path: PathBuf,
    pub left_size: u64,

    pub right_id: u32,
    pub right_path: PathBuf,
    pub right_size: u64,

    pub self_pairing: bool,
    pub estimated_unique_ids: u64,

    pub package_dir: PathBuf,
}

/// Node capacity heuristic: `max(5, floor(n^(1/20)))`, targeting a tree
/// height around 20 so leaf I/O stays small for the per-pairing key counts
pub fn max_keys_for(estimated_unique_ids: u64) -> usize {
    let computed = (estimated_unique_ids as f64).powf(1.0 / 20.0).floor() as usize;
    computed.max(5)
}

/// Reopen a persisted result tree by its handle
///
/// Used by the resume path and by downstream consumers merging per-package
/// results into a global index.
pub fn open_result_tree(package_dir: &Path, handle: &TreeHandle, k: usize) -> Result<ResultTree> {
    let directory = BufferedStorage::open(package_dir.join(&handle.directory_file))?;
    let data = DirectStorage::open(package_dir.join(&handle.data_file))?;
    DynamicBPlusTree::open(directory, data, DistanceListSerializer::new(k))
}

/// Score one pairing end-to-end and return the handle of its result tree
///
/// The tree's two files are created in the package directory and stay
/// there: they are the result the handle pins, so the tree is closed (and
/// both files synced) before the handle is returned, and nothing is ever
/// unlinked.
pub(crate) fn process_pairing(
    spec: &TaskSpec,
    metric: &dyn DistanceMetric,
    k: usize,
    total_tasks: usize,
    package_pairings: usize,
) -> Result<TreeHandle> {
    info!(
        "processing pairing {} of {} ({} in package)",
        spec.task_id, total_tasks, package_pairings
    );

    let max_keys = max_keys_for(spec.estimated_unique_ids);
    debug!(
        "max keys per node: {} for {} estimated ids",
        max_keys, spec.estimated_unique_ids
    );

    let directory_file = format!("pairing{:05}.dir", spec.pairing_index);
    let data_file = format!("pairing{:05}.dat", spec.pairing_index);
    let directory = BufferedStorage::create(spec.package_dir.join(&directory_file))?;
    let data = DirectStorage::create(spec.package_dir.join(&data_file))?;
    let mut tree =
        DynamicBPlusTree::create(directory, data, DistanceListSerializer::new(k), max_keys)?;
    let mut seen: HashSet<PointId> = HashSet::new();

    info!(
        "pairing {}: partition{:05} ({} items) with partition{:05} ({} items)",
        spec.task_id, spec.left_id, spec.left_size, spec.right_id, spec.right_size
    );

    let left = Partition::read_from(&spec.left_path)?;
    if spec.self_pairing {
        scan_pass(&mut tree, &mut seen, &left, &left, metric, k, spec.task_id)?;
    } else {
        let right = Partition::read_from(&spec.right_path)?;
        scan_pass(&mut tree, &mut seen, &left, &right, metric, k, spec.task_id)?;
        scan_pass(&mut tree, &mut seen, &right, &left, metric, k, spec.task_id)?;
    }

    let (root_offset, entry_count) = tree.close()?;
    Ok(TreeHandle {
        directory_file,
        data_file,
        root_offset,
        entry_count,
    })
}

/// One direction of the doubly-nested scan
fn scan_pass(
    tree: &mut ResultTree,
    seen: &mut HashSet<PointId>,
    queries: &Partition,
    candidates: &Partition,
    metric: &dyn DistanceMetric,
    k: usize,
    task_id: usize,
) -> Result<()> {
    for (counter, query) in queries.iter().enumerate() {
        if counter % 50 == 0 {
            info!(
                "pairing {}: processed {} of {} items ...",
                task_id,
                counter,
                queries.len()
            );
        }
        for candidate in candidates.iter() {
            let distance = metric.distance(&query.vector, &candidate.vector);
            persist_distance(tree, seen, query, candidate, distance, k)?;
        }
    }
    Ok(())
}

/// Fold one scored pair into the query point's list and write it back
///
/// The first touch of a left-side id creates its list; later touches load
/// it from the tree. The in-memory `seen` set saves a tree lookup per pair
/// on the hot path.
fn persist_distance(
    tree: &mut ResultTree,
    seen: &mut HashSet<PointId>,
    from: &Point,
    to: &Point,
    distance: f64,
    k: usize,
) -> Result<()> {
    let mut list = if seen.contains(&from.id) {
        tree.get(from.id)?
    } else {
        seen.insert(from.id);
        DistanceList::new(from.id, k)
    };
    list.add_distance(to.id, distance);
    tree.put(from.id, &list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Euclidean;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_partition(dir: &Path, id: u32, points: &[(u32, &[f64])]) -> (PathBuf, u64) {
        let mut partition = Partition::new(id);
        for &(point_id, vector) in points {
            partition.push(point_id, vector.to_vec());
        }
        let path = dir.join(format!("partition{:05}.bin", id));
        partition.write_to(&path).unwrap();
        (path, points.len() as u64)
    }

    fn spec_for(
        dir: &Path,
        left: (u32, PathBuf, u64),
        right: (u32, PathBuf, u64),
    ) -> TaskSpec {
        let self_pairing = left.0 == right.0;
        let estimated = if self_pairing {
            left.2
        } else {
            left.2 + right.2
        };
        TaskSpec {
            pairing_index: 0,
            task_id: 1,
            left_id: left.0,
            left_path: left.1,
            left_size: left.2,
            right_id: right.0,
            right_path: right.1,
            right_size: right.2,
            self_pairing,
            estimated_unique_ids: estimated,
            package_dir: dir.to_path_buf(),
        }
    }

    fn entries_for(dir: &Path, handle: &TreeHandle, k: usize, id: u32) -> Vec<(u32, f64)> {
        let mut tree = open_result_tree(dir, handle, k).unwrap();
        tree.get(id).unwrap().entries().to_vec()
    }

    #[test]
    fn test_cross_pairing_produces_lists_for_both_sides() {
        // A = {(1, [0,0])}, B = {(2, [3,0]), (3, [0,4])}, Euclidean, k=2
        let dir = TempDir::new().unwrap();
        let (a_path, a_size) = write_partition(dir.path(), 0, &[(1, &[0.0, 0.0])]);
        let (b_path, b_size) =
            write_partition(dir.path(), 1, &[(2, &[3.0, 0.0]), (3, &[0.0, 4.0])]);

        let spec = spec_for(dir.path(), (0, a_path, a_size), (1, b_path, b_size));
        let handle = process_pairing(&spec, &Euclidean, 2, 1, 1).unwrap();

        assert_eq!(handle.entry_count, 3);
        assert_eq!(
            entries_for(dir.path(), &handle, 2, 1),
            vec![(2, 3.0), (3, 4.0)]
        );
        assert_eq!(entries_for(dir.path(), &handle, 2, 2), vec![(1, 3.0)]);
        assert_eq!(entries_for(dir.path(), &handle, 2, 3), vec![(1, 4.0)]);
    }

    #[test]
    fn test_self_pairing_single_pass() {
        // self-pairing on {(1,[0]), (2,[1]), (3,[3])}, k=2
        let dir = TempDir::new().unwrap();
        let (path, size) =
            write_partition(dir.path(), 0, &[(1, &[0.0]), (2, &[1.0]), (3, &[3.0])]);

        let spec = spec_for(
            dir.path(),
            (0, path.clone(), size),
            (0, path, size),
        );
        let handle = process_pairing(&spec, &Euclidean, 2, 1, 1).unwrap();

        assert_eq!(handle.entry_count, 3);
        assert_eq!(
            entries_for(dir.path(), &handle, 2, 1),
            vec![(1, 0.0), (2, 1.0)]
        );
        assert_eq!(
            entries_for(dir.path(), &handle, 2, 2),
            vec![(2, 0.0), (1, 1.0)]
        );
        assert_eq!(
            entries_for(dir.path(), &handle, 2, 3),
            vec![(3, 0.0), (2, 2.0)]
        );
    }

    #[test]
    fn test_tie_resolution_follows_iteration_order() {
        // B iterates (2,[1]) before (3,[-1]); both are at distance 1 from
        // point 1, so with k=1 the first-iterated neighbor wins
        let dir = TempDir::new().unwrap();
        let (a_path, a_size) = write_partition(dir.path(), 0, &[(1, &[0.0])]);
        let (b_path, b_size) = write_partition(dir.path(), 1, &[(2, &[1.0]), (3, &[-1.0])]);

        let spec = spec_for(dir.path(), (0, a_path, a_size), (1, b_path, b_size));
        let handle = process_pairing(&spec, &Euclidean, 1, 1, 1).unwrap();

        assert_eq!(entries_for(dir.path(), &handle, 1, 1), vec![(2, 1.0)]);
    }

    #[test]
    fn test_singleton_self_pairing() {
        let dir = TempDir::new().unwrap();
        let (path, size) = write_partition(dir.path(), 0, &[(7, &[1.0, 2.0])]);

        let spec = spec_for(dir.path(), (0, path.clone(), size), (0, path, size));
        let handle = process_pairing(&spec, &Euclidean, 3, 1, 1).unwrap();

        assert_eq!(handle.entry_count, 1);
        assert_eq!(entries_for(dir.path(), &handle, 3, 7), vec![(7, 0.0)]);
    }

    #[test]
    fn test_max_keys_heuristic() {
        assert_eq!(max_keys_for(0), 5);
        assert_eq!(max_keys_for(1), 5);
        // 2^20 = 1,048,576 -> floor(n^(1/20)) = 2, clamped to the floor of 5
        assert_eq!(max_keys_for(1 << 20), 5);
        // u64::MAX^(1/20) ~ 9.19, comfortably clear of the clamp
        assert_eq!(max_keys_for(u64::MAX), 9);
    }

    #[test]
    fn test_result_files_survive_close() {
        let dir = TempDir::new().unwrap();
        let (path, size) = write_partition(dir.path(), 0, &[(1, &[0.0]), (2, &[5.0])]);

        let spec = spec_for(dir.path(), (0, path.clone(), size), (0, path, size));
        let handle = process_pairing(&spec, &Euclidean, 2, 1, 1).unwrap();

        assert!(dir.path().join(&handle.directory_file).exists());
        assert!(dir.path().join(&handle.data_file).exists());
    }
}
