//! Fundamental types used across the entire workspace.

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Scalar types: f64 throughout for numerical precision in the filters.
// ---------------------------------------------------------------------------

/// State vector. Length depends on the motion model (6 for CV, 9 for CA).
pub type StateVec = DVector<f64>;

/// State covariance matrix P, or its lower Cholesky factor L (P = L·Lᵀ)
/// when carried by the square-root filter.
pub type StateCov = DMatrix<f64>;

/// 3-D cartesian position / velocity vector (meters, meters per second).
pub type Vec3 = Vector3<f64>;

/// Dimension of the observation space: positions only.
pub const MEASUREMENT_DIM: usize = 3;

// ---------------------------------------------------------------------------
// Identifier types: newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ObserverId(pub i64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// A single 3-D position report from one observer.
#[derive(Clone, Debug)]
pub struct Measurement {
    /// Reported cartesian position (meters)
    pub position: Vec3,
    /// Wall-clock timestamp in seconds
    pub timestamp: f64,
    /// Which observer produced this report. Metadata only: association is
    /// purely spatial, so close reports from different observers merge.
    pub observer_id: ObserverId,
}

impl Measurement {
    pub fn new(position: Vec3, timestamp: f64, observer_id: ObserverId) -> Self {
        Self {
            position,
            timestamp,
            observer_id,
        }
    }
}
