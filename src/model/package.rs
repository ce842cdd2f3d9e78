//! Package descriptor: the on-disk record of one unit of work
//!
//! The descriptor is a JSON file listing the package's partitions and the
//! pairings to compute on them, plus (per pairing) the handle of the result
//! tree once a worker has produced one. All referenced files live in the
//! descriptor's parent directory, so a package can be moved to a cluster
//! node as a single folder.
//!
//! Rewrites are atomic: the new descriptor is written to a temp file,
//! fsynced, and renamed over the old one. `rename()` is atomic on POSIX, so
//! a crash leaves either the old or the new descriptor, never a torn one.

use crate::model::{Partition, PartitionPairing, TreeHandle};
use crate::{ProcessError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const DESCRIPTOR_VERSION: u32 = 1;

/// Descriptor record for one partition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Partition id
    pub id: u32,

    /// File name relative to the package directory
    pub file: String,

    /// Number of points in the partition
    pub size: u64,
}

/// On-disk record listing all pairings plus, per pairing, an optional
/// result tree handle
#[derive(Debug, Serialize, Deserialize)]
pub struct PackageDescriptor {
    version: u32,

    partitions: Vec<PartitionEntry>,

    pairings: Vec<PartitionPairing>,

    /// CRC32 over the record set, recomputed on every rewrite
    checksum: u32,

    #[serde(skip)]
    path: PathBuf,
}

impl PackageDescriptor {
    /// Create an empty descriptor that will persist at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            partitions: Vec::new(),
            pairings: Vec::new(),
            checksum: 0,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read a descriptor from `path`
    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut descriptor: PackageDescriptor = serde_json::from_reader(reader)?;
        descriptor.path = path.to_path_buf();

        if descriptor.version != DESCRIPTOR_VERSION {
            return Err(ProcessError::CorruptPackage(format!(
                "unsupported descriptor version: {}",
                descriptor.version
            )));
        }
        Ok(descriptor)
    }

    /// The directory all package files live in
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// The descriptor's own file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `partition` into the package directory and record it
    pub fn add_partition(&mut self, partition: &Partition) -> Result<()> {
        if self.partitions.iter().any(|e| e.id == partition.id()) {
            return Err(ProcessError::CorruptPackage(format!(
                "partition {} already present in package",
                partition.id()
            )));
        }

        let file = format!("partition{:05}.bin", partition.id());
        partition.write_to(&self.dir().join(&file))?;
        self.partitions.push(PartitionEntry {
            id: partition.id(),
            file,
            size: partition.len() as u64,
        });
        Ok(())
    }

    /// Record a pairing of two already-added partitions
    ///
    /// The estimated-unique-ids bound is derived from the partition sizes:
    /// for a self-pairing only the left side contributes query ids, for a
    /// cross pairing both sides do (the worker runs both directions).
    pub fn add_pairing(&mut self, left: u32, right: u32) -> Result<()> {
        let left_size = self.partition_entry(left)?.size;
        let right_size = self.partition_entry(right)?.size;

        let estimated = if left == right {
            left_size
        } else {
            left_size + right_size
        };
        self.pairings.push(PartitionPairing::new(left, right, estimated));
        Ok(())
    }

    pub fn pairings(&self) -> &[PartitionPairing] {
        &self.pairings
    }

    /// Number of pairings in the package
    pub fn pairing_count(&self) -> usize {
        self.pairings.len()
    }

    pub fn partition_entry(&self, id: u32) -> Result<&PartitionEntry> {
        self.partitions
            .iter()
            .find(|e| e.id == id)
            .ok_or(ProcessError::PartitionNotFound(id))
    }

    /// Absolute path of a partition's backing file
    pub fn partition_path(&self, id: u32) -> Result<PathBuf> {
        Ok(self.dir().join(&self.partition_entry(id)?.file))
    }

    /// Load a partition's points from disk
    pub fn load_partition(&self, id: u32) -> Result<Partition> {
        Partition::read_from(&self.partition_path(id)?)
    }

    /// Pin a result tree into the package and rewrite the descriptor
    ///
    /// Callers must serialize this across threads; the engine holds the
    /// descriptor behind a mutex. Fails if the pairing already has a result.
    pub fn set_result_for(&mut self, pairing_index: usize, handle: TreeHandle) -> Result<()> {
        let pairing = self.pairings.get_mut(pairing_index).ok_or_else(|| {
            ProcessError::CorruptPackage(format!("no pairing at index {}", pairing_index))
        })?;
        if pairing.result.is_some() {
            return Err(ProcessError::CorruptPackage(format!(
                "pairing {} already has a result",
                pairing_index
            )));
        }
        pairing.result = Some(handle);
        self.write_atomic()
    }

    /// Verify structural integrity: checksum, referenced files, pairing ids
    pub fn verify(&self) -> Result<()> {
        if self.checksum != self.compute_checksum() {
            return Err(ProcessError::CorruptPackage(
                "descriptor checksum mismatch".into(),
            ));
        }

        for entry in &self.partitions {
            if !self.dir().join(&entry.file).exists() {
                return Err(ProcessError::CorruptPackage(format!(
                    "missing partition file: {}",
                    entry.file
                )));
            }
        }

        for (index, pairing) in self.pairings.iter().enumerate() {
            self.partition_entry(pairing.left)?;
            self.partition_entry(pairing.right)?;

            if let Some(handle) = &pairing.result {
                for file in [&handle.directory_file, &handle.data_file] {
                    if !self.dir().join(file).exists() {
                        return Err(ProcessError::CorruptPackage(format!(
                            "pairing {}: missing result file {}",
                            index, file
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Atomically rewrite the descriptor file
    pub fn write_atomic(&mut self) -> Result<()> {
        self.checksum = self.compute_checksum();

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("descriptor.json");
        let temp_path = self.dir().join(format!("{}.tmp", file_name));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        let json = serde_json::to_string_pretty(self)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        std::fs::rename(&temp_path, &self.path)?;
        sync_dir(self.dir())?;
        Ok(())
    }

    #[cfg(test)]
    pub fn clear_result_for_test(&mut self, pairing_index: usize) {
        self.pairings[pairing_index].result = None;
    }

    fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.version.to_be_bytes());

        for entry in &self.partitions {
            hasher.update(&entry.id.to_be_bytes());
            hasher.update(entry.file.as_bytes());
            hasher.update(&entry.size.to_be_bytes());
        }

        for pairing in &self.pairings {
            hasher.update(&pairing.left.to_be_bytes());
            hasher.update(&pairing.right.to_be_bytes());
            hasher.update(&pairing.estimated_unique_ids.to_be_bytes());
            if let Some(handle) = &pairing.result {
                hasher.update(handle.directory_file.as_bytes());
                hasher.update(handle.data_file.as_bytes());
                hasher.update(&handle.root_offset.to_be_bytes());
                hasher.update(&handle.entry_count.to_be_bytes());
            }
        }
        hasher.finalize()
    }
}

/// Fsync a directory so a rename inside it is durable
fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let handle = File::open(dir)?;
        unsafe {
            libc::fsync(handle.as_raw_fd());
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_partition(id: u32, ids: &[u32]) -> Partition {
        let mut partition = Partition::new(id);
        for &point_id in ids {
            partition.push(point_id, vec![point_id as f64]);
        }
        partition
    }

    fn sample_package(dir: &Path) -> PackageDescriptor {
        let mut descriptor = PackageDescriptor::create(dir.join("package_descriptor.json"));
        descriptor.add_partition(&sample_partition(0, &[1, 2])).unwrap();
        descriptor.add_partition(&sample_partition(1, &[3])).unwrap();
        descriptor.add_pairing(0, 1).unwrap();
        descriptor.add_pairing(0, 0).unwrap();
        descriptor.write_atomic().unwrap();
        descriptor
    }

    #[test]
    fn test_write_read_verify_round_trip() {
        let dir = TempDir::new().unwrap();
        sample_package(dir.path());

        let loaded = PackageDescriptor::read_from(dir.path().join("package_descriptor.json")).unwrap();
        loaded.verify().unwrap();
        assert_eq!(loaded.pairing_count(), 2);
        assert_eq!(loaded.pairings()[0].estimated_unique_ids, 3);
        assert_eq!(loaded.pairings()[1].estimated_unique_ids, 2);
        assert!(loaded.pairings()[1].is_self_pairing());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = TempDir::new().unwrap();
        sample_package(dir.path());

        let descriptor_path = dir.path().join("package_descriptor.json");
        let text = std::fs::read_to_string(&descriptor_path).unwrap();
        let tampered = text.replace("\"estimated_unique_ids\": 3", "\"estimated_unique_ids\": 30");
        std::fs::write(&descriptor_path, tampered).unwrap();

        let loaded = PackageDescriptor::read_from(&descriptor_path).unwrap();
        assert!(matches!(
            loaded.verify(),
            Err(ProcessError::CorruptPackage(_))
        ));
    }

    #[test]
    fn test_verify_detects_missing_partition_file() {
        let dir = TempDir::new().unwrap();
        sample_package(dir.path());
        std::fs::remove_file(dir.path().join("partition00001.bin")).unwrap();

        let loaded = PackageDescriptor::read_from(dir.path().join("package_descriptor.json")).unwrap();
        assert!(loaded.verify().is_err());
    }

    #[test]
    fn test_set_result_for_is_write_once() {
        let dir = TempDir::new().unwrap();
        let mut descriptor = sample_package(dir.path());

        let handle = TreeHandle {
            directory_file: "pairing00000.dir".into(),
            data_file: "pairing00000.dat".into(),
            root_offset: 32,
            entry_count: 3,
        };
        // result files must exist for verify() to pass afterwards
        std::fs::write(dir.path().join("pairing00000.dir"), b"").unwrap();
        std::fs::write(dir.path().join("pairing00000.dat"), b"").unwrap();

        descriptor.set_result_for(0, handle.clone()).unwrap();
        assert!(descriptor.set_result_for(0, handle).is_err());

        let loaded = PackageDescriptor::read_from(dir.path().join("package_descriptor.json")).unwrap();
        loaded.verify().unwrap();
        assert!(loaded.pairings()[0].has_result());
        assert!(!loaded.pairings()[1].has_result());
    }

    #[test]
    fn test_add_pairing_rejects_unknown_partition() {
        let dir = TempDir::new().unwrap();
        let mut descriptor = PackageDescriptor::create(dir.path().join("d.json"));
        descriptor.add_partition(&sample_partition(0, &[1])).unwrap();
        assert!(matches!(
            descriptor.add_pairing(0, 9),
            Err(ProcessError::PartitionNotFound(9))
        ));
    }
}
