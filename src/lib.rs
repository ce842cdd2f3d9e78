//! knnpack: per-package k-nearest-neighbor distance processing
//!
//! A dataset is pre-partitioned and bundled into *packages*: a descriptor
//! plus partition files plus the list of partition pairings whose cross
//! products must be scored. Packages are distributed across cluster nodes;
//! each invocation of this engine processes one package end-to-end and is
//! idempotent, so interrupted runs can simply be restarted.
//!
//! ## Architecture
//! - Model layer: points, partitions, pairings, the package descriptor
//! - Storage layer: direct and write-buffered byte stores plus the value
//!   serializers
//! - Tree layer: dynamic B+ tree mapping point ids to distance lists, with
//!   payloads stored out-of-line in a second file
//! - Engine layer: per-pairing workers drained by a fixed thread pool
//!
//! Merging the per-package result trees into a global index is a separate
//! downstream concern; [`engine::open_result_tree`] is the hook it uses.

pub mod config;
pub mod distance;
pub mod engine;
pub mod model;
pub mod storage;
pub mod tree;

mod error;

pub use config::ProcessorConfig;
pub use engine::{PackageRunner, RunSummary};
pub use error::{ProcessError, Result};
pub use model::{
    DistanceList, PackageDescriptor, Partition, PartitionPairing, Point, PointId, TreeHandle,
};
