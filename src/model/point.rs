//! Points: the unit of distance computation

use serde::{Deserialize, Serialize};

/// Point identifier, globally unique within a dataset
pub type PointId = u32;

/// A point: an id plus its vector representation
///
/// Dimensionality is fixed per dataset and known only to the distance
/// function; the engine treats the vector as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub vector: Vec<f64>,
}

impl Point {
    pub fn new(id: PointId, vector: Vec<f64>) -> Self {
        Self { id, vector }
    }
}
