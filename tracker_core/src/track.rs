//! Track: one target's estimator plus lifecycle counters.
//!
//! A track wraps a cubature filter variant and a motion model. It is born
//! from a single measurement (position copied into the leading state slots,
//! everything else zero), then mutated only through [`Track::predict`] and
//! [`Track::update`]. Confirmation and loss are pure functions of the hit
//! and miss counters; a lost track is removed by the manager, so `Deleted`
//! is never an observable status.

use crate::cubature::CubatureFilter;
use crate::error::FilterError;
use crate::motion::MotionModel;
use crate::types::{Measurement, StateCov, StateVec, TrackId, Vec3, MEASUREMENT_DIM};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a live track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    /// Not yet confirmed — may be spurious
    Tentative,
    /// Seen at least `confirmation_hits` times
    Confirmed,
}

/// A single target track.
#[derive(Clone)]
pub struct Track {
    id: TrackId,
    filter: CubatureFilter,
    model: Box<dyn MotionModel>,
    /// State estimate [p, v] or [p, v, a]
    x: StateVec,
    /// Covariance representation: P for the standard filter, L for the
    /// square-root filter
    cov: StateCov,
    /// Observation noise R = σ²·I₃, fixed at construction
    measurement_noise: StateCov,
    /// Predict steps since birth
    age: u32,
    /// Updates since birth (birth measurement counts as the first hit)
    hits: u32,
    /// Consecutive cycles without a matched measurement
    misses: u32,
    last_update_time: f64,
    confirmation_hits: u32,
    max_misses_to_delete: u32,
}

impl Track {
    /// Create a tentative track from its first measurement.
    pub fn new(
        initial: &Measurement,
        id: TrackId,
        model: Box<dyn MotionModel>,
        filter: CubatureFilter,
        measurement_noise_std: f64,
        confirmation_hits: u32,
        max_misses_to_delete: u32,
    ) -> Result<Self, FilterError> {
        let n = model.state_dim();
        let mut x = StateVec::zeros(n);
        for i in 0..MEASUREMENT_DIM {
            x[i] = initial.position[i];
        }
        let cov = filter.initial_covariance(model.as_ref())?;
        let measurement_noise = StateCov::identity(MEASUREMENT_DIM, MEASUREMENT_DIM)
            * (measurement_noise_std * measurement_noise_std);

        Ok(Self {
            id,
            filter,
            model,
            x,
            cov,
            measurement_noise,
            age: 0,
            hits: 1,
            misses: 0,
            last_update_time: initial.timestamp,
            confirmation_hits,
            max_misses_to_delete,
        })
    }

    /// Propagate the estimate forward by `dt` seconds. No-op for dt ≤ 0.
    pub fn predict(&mut self, dt: f64) -> Result<(), FilterError> {
        if dt <= 0.0 {
            return Ok(());
        }
        self.filter
            .predict(&mut self.x, &mut self.cov, self.model.as_ref(), dt)?;
        self.age += 1;
        Ok(())
    }

    /// Fold a matched measurement into the estimate.
    pub fn update(&mut self, measurement: &Measurement) -> Result<(), FilterError> {
        self.filter.update(
            &mut self.x,
            &mut self.cov,
            self.model.as_ref(),
            &measurement.position,
            &self.measurement_noise,
        )?;
        self.hits += 1;
        self.misses = 0;
        self.last_update_time = self.last_update_time.max(measurement.timestamp);
        Ok(())
    }

    /// Register a cycle without a matched measurement.
    pub fn increment_misses(&mut self) {
        self.misses += 1;
    }

    pub fn is_confirmed(&self) -> bool {
        self.hits >= self.confirmation_hits
    }

    pub fn is_lost(&self) -> bool {
        self.misses > self.max_misses_to_delete
    }

    pub fn status(&self) -> TrackStatus {
        if self.is_confirmed() {
            TrackStatus::Confirmed
        } else {
            TrackStatus::Tentative
        }
    }

    /// Roll the pure motion model forward from the current state, producing
    /// ⌊horizon/step⌋ future positions. Does not mutate the track.
    pub fn predict_future_trajectory(&self, horizon: f64, step: f64) -> Vec<Vec3> {
        if horizon <= 0.0 || step <= 0.0 {
            return Vec::new();
        }
        let steps = (horizon / step).floor() as usize;
        let mut trajectory = Vec::with_capacity(steps);
        let mut state = self.x.clone();
        for _ in 0..steps {
            state = self.model.predict(&state, step);
            trajectory.push(self.model.observe(&state));
        }
        trajectory
    }

    // --- accessors ---

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn state(&self) -> &StateVec {
        &self.x
    }

    /// Estimated position (leading state components).
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x[0], self.x[1], self.x[2])
    }

    /// Estimated velocity (state components 3..5 for every model).
    pub fn velocity(&self) -> Vec3 {
        Vec3::new(self.x[3], self.x[4], self.x[5])
    }

    /// Full covariance P regardless of the carried representation.
    pub fn covariance(&self) -> StateCov {
        self.filter.full_covariance(&self.cov)
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn last_update_time(&self) -> f64 {
        self.last_update_time
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
