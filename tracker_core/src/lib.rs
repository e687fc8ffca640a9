//! `tracker_core` — Core multi-target tracking algorithms.
//!
//! # Module layout
//! - [`types`]         — Fundamental types (IDs, state vectors, measurements)
//! - [`motion`]        — Motion models (constant velocity, constant acceleration)
//! - [`cubature`]      — Cubature Kalman filter (standard and square-root forms)
//! - [`track`]         — Track struct, counters and status
//! - [`track_manager`] — Association / spawn / loss management across tracks
//! - [`error`]         — Recoverable filter error conditions

pub mod cubature;
pub mod error;
pub mod motion;
pub mod track;
pub mod track_manager;
pub mod types;

pub use cubature::CubatureFilter;
pub use error::FilterError;
pub use motion::{ConstantAcceleration, ConstantVelocity, MotionModel};
pub use track::{Track, TrackStatus};
pub use track_manager::{Association, TrackManager, TrackManagerConfig};
pub use types::{Measurement, ObserverId, StateCov, StateVec, TrackId, Vec3};
