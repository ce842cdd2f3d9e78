//! Distance functions for scoring partition pairings
//!
//! All metrics operate on raw `f64` component slices; dimensionality is a
//! property of the dataset and is never inspected by the engine itself.

pub mod euclidean;
pub mod manhattan;
pub mod cosine;

pub use euclidean::{euclidean_distance, squared_euclidean_distance};
pub use manhattan::manhattan_distance;
pub use cosine::cosine_distance;

use crate::{ProcessError, Result};

/// Distance metric trait
///
/// Implementations must be pure: the same pair of vectors always yields the
/// same distance. NaN handling is the implementor's responsibility; the
/// engine assumes finite results.
pub trait DistanceMetric: Send + Sync {
    /// Compute the distance between two vectors
    fn distance(&self, a: &[f64], b: &[f64]) -> f64;

    /// Short stable name, used in logs and on the command line
    fn name(&self) -> &'static str;
}

/// Euclidean (L2) distance metric
#[derive(Debug, Clone, Copy)]
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    #[inline]
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        euclidean_distance(a, b)
    }

    fn name(&self) -> &'static str {
        "euclidean"
    }
}

/// Squared Euclidean distance metric (avoids the sqrt; preserves ordering)
#[derive(Debug, Clone, Copy)]
pub struct SquaredEuclidean;

impl DistanceMetric for SquaredEuclidean {
    #[inline]
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        squared_euclidean_distance(a, b)
    }

    fn name(&self) -> &'static str {
        "squared-euclidean"
    }
}

/// Manhattan (L1) distance metric
#[derive(Debug, Clone, Copy)]
pub struct Manhattan;

impl DistanceMetric for Manhattan {
    #[inline]
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        manhattan_distance(a, b)
    }

    fn name(&self) -> &'static str {
        "manhattan"
    }
}

/// Cosine distance metric (1 - cosine similarity)
#[derive(Debug, Clone, Copy)]
pub struct Cosine;

impl DistanceMetric for Cosine {
    #[inline]
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        cosine_distance(a, b)
    }

    fn name(&self) -> &'static str {
        "cosine"
    }
}

/// Resolve a metric by its command-line name
pub fn metric_by_name(name: &str) -> Result<Box<dyn DistanceMetric>> {
    match name {
        "euclidean" => Ok(Box::new(Euclidean)),
        "squared-euclidean" => Ok(Box::new(SquaredEuclidean)),
        "manhattan" => Ok(Box::new(Manhattan)),
        "cosine" => Ok(Box::new(Cosine)),
        other => Err(ProcessError::InvalidParameter(format!(
            "unknown distance function: {}",
            other
        ))),
    }
}
