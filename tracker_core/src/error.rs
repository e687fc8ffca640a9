//! Recoverable error conditions raised by the filter layer.

use thiserror::Error;

/// Failures of the numerical kernel. All variants are recoverable: the
/// caller skips the affected predict/update and keeps the track alive with
/// an extra miss.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// A covariance (or its factor) lost positive definiteness and could not
    /// be repaired by re-symmetrisation and diagonal jitter.
    #[error("covariance is numerically unstable: {0}")]
    NumericallyUnstable(&'static str),
}
