//! Package data model
//!
//! The on-disk package consists of a descriptor file plus one bincode file
//! per partition; result trees produced by the engine are pinned into the
//! descriptor through [`TreeHandle`]s.

pub mod point;
pub mod distance_list;
pub mod partition;
pub mod pairing;
pub mod package;

pub use point::{Point, PointId};
pub use distance_list::DistanceList;
pub use partition::Partition;
pub use pairing::{PartitionPairing, TreeHandle};
pub use package::{PackageDescriptor, PartitionEntry};
