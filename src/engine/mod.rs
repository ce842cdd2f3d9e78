//! Per-package execution engine
//!
//! [`PackageRunner`] drains a package's pairings through a fixed worker
//! pool; each worker runs the nested scan of one pairing and persists its
//! top-k lists into a result tree.

pub mod worker;
pub mod runner;

pub use runner::{PackageRunner, RunSummary};
pub use worker::{max_keys_for, open_result_tree, ResultTree};
