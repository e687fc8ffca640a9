//! Motion models: state transition, observation projection, process noise.
//!
//! # Design
//! The filters call `predict` / `observe` / `process_noise` /
//! `initial_covariance` through the [`MotionModel`] trait without knowing the
//! concrete model. Each track owns its model by value behind the trait; the
//! models themselves are stateless (all parameters fixed at construction) and
//! every method is a pure function of its inputs.
//!
//! ## Constant velocity (6-state)
//! x = [px, py, pz, vx, vy, vz]ᵀ, p += v·dt.
//! Q(dt) is the discrete white-noise-acceleration model Q = G·Gᵀ·q with
//! G = [½dt²·I₃; dt·I₃] and q = σ²_acc.
//!
//! ## Constant acceleration (9-state)
//! x = [px, py, pz, vx, vy, vz, ax, ay, az]ᵀ, p += v·dt + ½a·dt², v += a·dt.
//! Q(dt) is the discrete white-noise-jerk model with the dt⁵/20 … dt block
//! coefficients, scaled by q = σ²_jerk.

use crate::types::{StateCov, StateVec, Vec3, MEASUREMENT_DIM};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Capability set the filters require from a motion model.
pub trait MotionModel: Send + Sync {
    /// Dimension of the state vector.
    fn state_dim(&self) -> usize;

    /// Dimension of the observation vector (positions only).
    fn measurement_dim(&self) -> usize {
        MEASUREMENT_DIM
    }

    /// Propagate a state forward by `dt` seconds.
    fn predict(&self, x: &StateVec, dt: f64) -> StateVec;

    /// Project a state into the observation space.
    fn observe(&self, x: &StateVec) -> Vec3;

    /// Process noise covariance Q for a step of `dt` seconds.
    fn process_noise(&self, dt: f64) -> StateCov;

    /// Covariance a freshly created track starts from.
    fn initial_covariance(&self) -> StateCov;

    /// Clone behind the trait object (tracks are snapshot-cloneable).
    fn boxed_clone(&self) -> Box<dyn MotionModel>;
}

impl Clone for Box<dyn MotionModel> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

// ---------------------------------------------------------------------------
// Constant velocity
// ---------------------------------------------------------------------------

/// Constant-velocity model: 6-state, white-noise-acceleration driven.
#[derive(Clone, Debug)]
pub struct ConstantVelocity {
    /// Acceleration noise std σ_acc (m/s²)
    process_noise_std: f64,
    /// Initial position variance (m²)
    initial_position_uncertainty: f64,
    /// Initial velocity variance (m²/s²)
    initial_velocity_uncertainty: f64,
}

impl ConstantVelocity {
    pub const STATE_DIM: usize = 6;

    pub fn new(
        process_noise_std: f64,
        initial_position_uncertainty: f64,
        initial_velocity_uncertainty: f64,
    ) -> Self {
        Self {
            process_noise_std,
            initial_position_uncertainty,
            initial_velocity_uncertainty,
        }
    }
}

impl Default for ConstantVelocity {
    fn default() -> Self {
        Self::new(5.0, 10.0, 100.0)
    }
}

impl MotionModel for ConstantVelocity {
    fn state_dim(&self) -> usize {
        Self::STATE_DIM
    }

    fn predict(&self, x: &StateVec, dt: f64) -> StateVec {
        let mut out = x.clone();
        for i in 0..3 {
            out[i] += x[i + 3] * dt;
        }
        out
    }

    fn observe(&self, x: &StateVec) -> Vec3 {
        Vec3::new(x[0], x[1], x[2])
    }

    fn process_noise(&self, dt: f64) -> StateCov {
        let q = self.process_noise_std * self.process_noise_std;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;

        // Q = G·Gᵀ·q with G = [½dt²·I₃; dt·I₃]
        let mut qm = StateCov::zeros(Self::STATE_DIM, Self::STATE_DIM);
        for i in 0..3 {
            qm[(i, i)] = q * dt4 / 4.0;
            qm[(i + 3, i + 3)] = q * dt2;
            qm[(i, i + 3)] = q * dt3 / 2.0;
            qm[(i + 3, i)] = q * dt3 / 2.0;
        }
        qm
    }

    fn initial_covariance(&self) -> StateCov {
        let mut p = StateCov::identity(Self::STATE_DIM, Self::STATE_DIM);
        for i in 0..3 {
            p[(i, i)] = self.initial_position_uncertainty;
            p[(i + 3, i + 3)] = self.initial_velocity_uncertainty;
        }
        p
    }

    fn boxed_clone(&self) -> Box<dyn MotionModel> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Constant acceleration
// ---------------------------------------------------------------------------

/// Constant-acceleration model: 9-state, white-noise-jerk driven.
#[derive(Clone, Debug)]
pub struct ConstantAcceleration {
    /// Jerk noise std σ_jerk (m/s³)
    process_noise_std: f64,
    /// Initial position variance (m²)
    initial_position_uncertainty: f64,
    /// Initial velocity variance (m²/s²)
    initial_velocity_uncertainty: f64,
    /// Initial acceleration variance (m²/s⁴)
    initial_acceleration_uncertainty: f64,
}

impl ConstantAcceleration {
    pub const STATE_DIM: usize = 9;

    pub fn new(
        process_noise_std: f64,
        initial_position_uncertainty: f64,
        initial_velocity_uncertainty: f64,
        initial_acceleration_uncertainty: f64,
    ) -> Self {
        Self {
            process_noise_std,
            initial_position_uncertainty,
            initial_velocity_uncertainty,
            initial_acceleration_uncertainty,
        }
    }
}

impl Default for ConstantAcceleration {
    fn default() -> Self {
        Self::new(1.0, 10.0, 100.0, 10.0)
    }
}

impl MotionModel for ConstantAcceleration {
    fn state_dim(&self) -> usize {
        Self::STATE_DIM
    }

    fn predict(&self, x: &StateVec, dt: f64) -> StateVec {
        let mut out = x.clone();
        for i in 0..3 {
            out[i] += x[i + 3] * dt + 0.5 * x[i + 6] * dt * dt;
            out[i + 3] += x[i + 6] * dt;
        }
        out
    }

    fn observe(&self, x: &StateVec) -> Vec3 {
        Vec3::new(x[0], x[1], x[2])
    }

    fn process_noise(&self, dt: f64) -> StateCov {
        let q = self.process_noise_std * self.process_noise_std;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;
        let dt5 = dt4 * dt;

        let mut qm = StateCov::zeros(Self::STATE_DIM, Self::STATE_DIM);
        for i in 0..3 {
            qm[(i, i)] = q * dt5 / 20.0;
            qm[(i + 3, i + 3)] = q * dt3 / 3.0;
            qm[(i + 6, i + 6)] = q * dt;
            qm[(i, i + 3)] = q * dt4 / 8.0;
            qm[(i + 3, i)] = q * dt4 / 8.0;
            qm[(i, i + 6)] = q * dt3 / 6.0;
            qm[(i + 6, i)] = q * dt3 / 6.0;
            qm[(i + 3, i + 6)] = q * dt2 / 2.0;
            qm[(i + 6, i + 3)] = q * dt2 / 2.0;
        }
        qm
    }

    fn initial_covariance(&self) -> StateCov {
        let mut p = StateCov::identity(Self::STATE_DIM, Self::STATE_DIM);
        for i in 0..3 {
            p[(i, i)] = self.initial_position_uncertainty;
            p[(i + 3, i + 3)] = self.initial_velocity_uncertainty;
            p[(i + 6, i + 6)] = self.initial_acceleration_uncertainty;
        }
        p
    }

    fn boxed_clone(&self) -> Box<dyn MotionModel> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;

    #[test]
    fn cv_predict_moves_position_only() {
        let model = ConstantVelocity::default();
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 10.0, -2.0, 1.0]);

        let pred = model.predict(&x, 0.5);
        assert_abs_diff_eq!(pred[0], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pred[1], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pred[2], 0.5, epsilon = 1e-12);
        // velocity unchanged
        assert_abs_diff_eq!(pred[3], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn cv_predict_is_pure() {
        let model = ConstantVelocity::default();
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let a = model.predict(&x, 0.1);
        let b = model.predict(&x, 0.1);
        assert_eq!(a, b, "repeated calls must be bitwise identical");
    }

    #[test]
    fn ca_predict_integrates_acceleration() {
        let model = ConstantAcceleration::default();
        let mut x = DVector::zeros(9);
        x[3] = 2.0; // vx
        x[6] = 4.0; // ax

        let pred = model.predict(&x, 1.0);
        assert_abs_diff_eq!(pred[0], 2.0 + 0.5 * 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pred[3], 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pred[6], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn process_noise_is_symmetric() {
        let cv = ConstantVelocity::default();
        let ca = ConstantAcceleration::default();
        for model in [&cv as &dyn MotionModel, &ca as &dyn MotionModel] {
            let q = model.process_noise(0.1);
            let diff = (&q - q.transpose()).norm();
            assert!(diff < 1e-15, "Q must be symmetric, asymmetry {diff}");
        }
    }

    #[test]
    fn observe_projects_position() {
        let model = ConstantAcceleration::default();
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let z = model.observe(&x);
        assert_eq!((z[0], z[1], z[2]), (1.0, 2.0, 3.0));
    }

    #[test]
    fn initial_covariance_is_diagonal() {
        let model = ConstantVelocity::new(5.0, 4.0, 9.0);
        let p = model.initial_covariance();
        assert_abs_diff_eq!(p[(0, 0)], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[(3, 3)], 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[(0, 3)], 0.0, epsilon = 1e-12);
    }
}
