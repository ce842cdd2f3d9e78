//! Disk-backed result trees

pub mod bptree;

pub use bptree::DynamicBPlusTree;
