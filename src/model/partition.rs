//! Partitions: iterable point sets addressed by id
//!
//! A partition is persisted as one bincode file inside the package
//! directory. Iteration order is the order of the backing vector and is
//! stable across loads; tie-breaking in [`DistanceList`](crate::model::DistanceList)
//! depends on this order, so it is part of the partition contract.

use crate::model::{Point, PointId};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// An iterable set of points with a stable order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    id: u32,
    points: Vec<Point>,
}

impl Partition {
    /// Create an empty partition
    pub fn new(id: u32) -> Self {
        Self {
            id,
            points: Vec::new(),
        }
    }

    /// Create a partition from an ordered point set
    pub fn with_points(id: u32, points: Vec<Point>) -> Self {
        Self { id, points }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point; it becomes the last in iteration order
    pub fn push(&mut self, id: PointId, vector: Vec<f64>) {
        self.points.push(Point::new(id, vector));
    }

    /// Iterate points in their stable order
    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    /// Write the partition to `path`, fsynced
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Load a partition from `path`
    pub fn read_from(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let partition = bincode::deserialize_from(reader)?;
        Ok(partition)
    }
}

impl<'a> IntoIterator for &'a Partition {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_iteration_order_is_insertion_order() {
        let mut partition = Partition::new(0);
        partition.push(5, vec![1.0]);
        partition.push(2, vec![2.0]);
        partition.push(9, vec![3.0]);

        let ids: Vec<_> = partition.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![5, 2, 9]);
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partition00000.bin");

        let mut partition = Partition::new(3);
        partition.push(1, vec![0.5, -1.5]);
        partition.push(2, vec![2.0, 4.0]);
        partition.write_to(&path).unwrap();

        let loaded = Partition::read_from(&path).unwrap();
        assert_eq!(loaded.id(), 3);
        assert_eq!(loaded.len(), 2);
        let ids: Vec<_> = loaded.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(loaded.iter().next().unwrap().vector, vec![0.5, -1.5]);
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Partition::read_from(&dir.path().join("absent.bin")).is_err());
    }
}
