//! Cubature Kalman filter: predict / update in standard and square-root form.
//!
//! # Cubature point set
//! For mean x (length n) and square-root factor L (P = L·Lᵀ) the filter uses
//! the 2n points x ± √n·L·eᵢ with equal weights 1/(2n), propagated through
//! the motion model's transition or observation map.
//!
//! # Variants
//! - [`CubatureFilter::Standard`] carries the full covariance P.
//! - [`CubatureFilter::SquareRoot`] carries the lower Cholesky factor L and
//!   never forms P explicitly: additive combinations go through a QR-based
//!   triangular factor update, the measurement update through rank-one
//!   downdates with an explicit positivity check.
//!
//! # Numerical policy
//! A failed Cholesky factorisation is retried on the re-symmetrised matrix
//! ½(P+Pᵀ), then once more with diagonal jitter scaled to the mean diagonal
//! magnitude. A factorisation or downdate that still fails surfaces
//! [`FilterError::NumericallyUnstable`]; the caller skips the step.

use crate::error::FilterError;
use crate::motion::MotionModel;
use crate::types::{StateCov, StateVec, Vec3};
use nalgebra::linalg::Cholesky;
use nalgebra::{DVector, Dyn};

// ---------------------------------------------------------------------------
// Filter front-end
// ---------------------------------------------------------------------------

/// Cubature Kalman filter variant. The meaning of the `cov` argument of
/// [`predict`](Self::predict) / [`update`](Self::update) depends on the
/// variant: the full covariance P for `Standard`, its lower Cholesky factor
/// L for `SquareRoot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CubatureFilter {
    /// Classic CKF carrying P.
    Standard,
    /// Square-root CKF carrying L with P = L·Lᵀ.
    SquareRoot,
}

impl CubatureFilter {
    /// Covariance representation a new track starts from.
    pub fn initial_covariance(&self, model: &dyn MotionModel) -> Result<StateCov, FilterError> {
        let p0 = model.initial_covariance();
        match self {
            CubatureFilter::Standard => Ok(p0),
            CubatureFilter::SquareRoot => Ok(robust_cholesky(&p0)?.l()),
        }
    }

    /// Propagate mean and covariance representation forward by `dt` seconds.
    pub fn predict(
        &self,
        x: &mut StateVec,
        cov: &mut StateCov,
        model: &dyn MotionModel,
        dt: f64,
    ) -> Result<(), FilterError> {
        match self {
            CubatureFilter::Standard => ckf_predict(x, cov, model, dt),
            CubatureFilter::SquareRoot => srckf_predict(x, cov, model, dt),
        }
    }

    /// Fold the observation `z` with noise covariance `r` into the state.
    pub fn update(
        &self,
        x: &mut StateVec,
        cov: &mut StateCov,
        model: &dyn MotionModel,
        z: &Vec3,
        r: &StateCov,
    ) -> Result<(), FilterError> {
        match self {
            CubatureFilter::Standard => ckf_update(x, cov, model, z, r),
            CubatureFilter::SquareRoot => srckf_update(x, cov, model, z, r),
        }
    }

    /// Recover the full covariance P from the carried representation.
    pub fn full_covariance(&self, cov: &StateCov) -> StateCov {
        match self {
            CubatureFilter::Standard => cov.clone(),
            CubatureFilter::SquareRoot => cov * cov.transpose(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Cholesky factorisation with the re-symmetrise / jitter recovery ladder.
pub(crate) fn robust_cholesky(m: &StateCov) -> Result<Cholesky<f64, Dyn>, FilterError> {
    if let Some(chol) = Cholesky::new(m.clone()) {
        return Ok(chol);
    }
    let sym = (m + m.transpose()) * 0.5;
    if let Some(chol) = Cholesky::new(sym.clone()) {
        return Ok(chol);
    }
    let n = m.nrows();
    let eps = 1e-9 * (sym.trace().abs() / n as f64).max(1.0);
    let jittered = sym + StateCov::identity(n, n) * eps;
    Cholesky::new(jittered).ok_or(FilterError::NumericallyUnstable(
        "not positive definite after symmetrisation and jitter",
    ))
}

/// Generate the 2n cubature points x ± √n·L·eᵢ.
fn cubature_points(x: &StateVec, l: &StateCov) -> Vec<StateVec> {
    let n = x.len();
    let scale = (n as f64).sqrt();
    let mut points = Vec::with_capacity(2 * n);
    for i in 0..n {
        points.push(x + l.column(i) * scale);
    }
    for i in 0..n {
        points.push(x - l.column(i) * scale);
    }
    points
}

/// Equal-weight mean of a non-empty point set.
fn point_mean(points: &[DVector<f64>]) -> DVector<f64> {
    let mut mean = DVector::zeros(points[0].len());
    for p in points {
        mean += p;
    }
    mean / points.len() as f64
}

fn observe_dyn(model: &dyn MotionModel, x: &StateVec) -> DVector<f64> {
    let z = model.observe(x);
    DVector::from_column_slice(z.as_slice())
}

/// Triangularise the stacked blocks: with A = [B₁ᵀ; B₂ᵀ; …] and A = Q·R,
/// return Rᵀ restricted to its leading n×n square, sign-normalised to a
/// non-negative diagonal. The result L satisfies L·Lᵀ = Σ Bᵢ·Bᵢᵀ.
fn qr_factor(blocks: &[&StateCov]) -> StateCov {
    let n = blocks[0].nrows();
    let rows: usize = blocks.iter().map(|b| b.ncols()).sum();
    let mut stacked = StateCov::zeros(rows, n);
    let mut at = 0;
    for block in blocks {
        stacked
            .view_mut((at, 0), (block.ncols(), n))
            .copy_from(&block.transpose());
        at += block.ncols();
    }
    let r = stacked.qr().r();
    let mut l = r.transpose();
    for j in 0..n {
        if l[(j, j)] < 0.0 {
            for i in 0..n {
                l[(i, j)] = -l[(i, j)];
            }
        }
    }
    l
}

/// Rank-one downdates of a lower Cholesky factor: on success L·Lᵀ becomes
/// L₀·L₀ᵀ − U·Uᵀ, applied one column of U at a time via Givens-style
/// rotations. Fails when the downdated matrix would lose positive
/// definiteness, leaving L partially modified; callers must discard it.
fn cholesky_downdate(l: &mut StateCov, u: &StateCov) -> Result<(), FilterError> {
    let n = l.nrows();
    for c in 0..u.ncols() {
        let mut w: DVector<f64> = u.column(c).into_owned();
        for k in 0..n {
            let lkk = l[(k, k)];
            let r2 = lkk * lkk - w[k] * w[k];
            if r2 <= 0.0 || lkk == 0.0 {
                return Err(FilterError::NumericallyUnstable(
                    "downdate lost positive definiteness",
                ));
            }
            let r = r2.sqrt();
            let cos = r / lkk;
            let sin = w[k] / lkk;
            l[(k, k)] = r;
            for i in (k + 1)..n {
                l[(i, k)] = (l[(i, k)] - sin * w[i]) / cos;
                w[i] = cos * w[i] - sin * l[(i, k)];
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Standard form
// ---------------------------------------------------------------------------

fn ckf_predict(
    x: &mut StateVec,
    p: &mut StateCov,
    model: &dyn MotionModel,
    dt: f64,
) -> Result<(), FilterError> {
    let n = model.state_dim();
    let l = robust_cholesky(p)?.l();
    let points: Vec<StateVec> = cubature_points(x, &l)
        .into_iter()
        .map(|pt| model.predict(&pt, dt))
        .collect();

    let mean = point_mean(&points);
    let mut cov = StateCov::zeros(n, n);
    for pt in &points {
        let d = pt - &mean;
        cov += &d * d.transpose();
    }
    cov /= points.len() as f64;
    cov += model.process_noise(dt);

    *x = mean;
    *p = cov;
    Ok(())
}

fn ckf_update(
    x: &mut StateVec,
    p: &mut StateCov,
    model: &dyn MotionModel,
    z: &Vec3,
    r: &StateCov,
) -> Result<(), FilterError> {
    let n = model.state_dim();
    let m = model.measurement_dim();
    let l = robust_cholesky(p)?.l();
    let points = cubature_points(x, &l);
    let z_points: Vec<DVector<f64>> = points.iter().map(|pt| observe_dyn(model, pt)).collect();
    let z_pred = point_mean(&z_points);

    let mut p_zz = StateCov::zeros(m, m);
    let mut p_xz = StateCov::zeros(n, m);
    for (pt, zp) in points.iter().zip(&z_points) {
        let dz = zp - &z_pred;
        let dx = pt - &*x;
        p_zz += &dz * dz.transpose();
        p_xz += &dx * dz.transpose();
    }
    let count = points.len() as f64;
    p_zz /= count;
    p_xz /= count;
    p_zz += r;

    // Gain solves K·P_zz = P_xz.
    let k = robust_cholesky(&p_zz)?.solve(&p_xz.transpose()).transpose();
    let z_dyn = DVector::from_column_slice(z.as_slice());

    *x += &k * (&z_dyn - &z_pred);
    *p -= &k * &p_zz * k.transpose();
    Ok(())
}

// ---------------------------------------------------------------------------
// Square-root form
// ---------------------------------------------------------------------------

fn srckf_predict(
    x: &mut StateVec,
    l: &mut StateCov,
    model: &dyn MotionModel,
    dt: f64,
) -> Result<(), FilterError> {
    let n = model.state_dim();
    let points: Vec<StateVec> = cubature_points(x, l)
        .into_iter()
        .map(|pt| model.predict(&pt, dt))
        .collect();

    let mean = point_mean(&points);
    let alpha = 1.0 / (points.len() as f64).sqrt();
    let mut deviations = StateCov::zeros(n, points.len());
    for (i, pt) in points.iter().enumerate() {
        deviations.set_column(i, &((pt - &mean) * alpha));
    }
    let s_q = robust_cholesky(&model.process_noise(dt))?.l();

    *l = qr_factor(&[&deviations, &s_q]);
    *x = mean;
    Ok(())
}

fn srckf_update(
    x: &mut StateVec,
    l: &mut StateCov,
    model: &dyn MotionModel,
    z: &Vec3,
    r: &StateCov,
) -> Result<(), FilterError> {
    let n = model.state_dim();
    let m = model.measurement_dim();
    let points = cubature_points(x, l);
    let z_points: Vec<DVector<f64>> = points.iter().map(|pt| observe_dyn(model, pt)).collect();
    let z_pred = point_mean(&z_points);

    let alpha = 1.0 / (points.len() as f64).sqrt();
    let mut z_dev = StateCov::zeros(m, points.len());
    let mut p_xz = StateCov::zeros(n, m);
    for (i, (pt, zp)) in points.iter().zip(&z_points).enumerate() {
        let dz = zp - &z_pred;
        z_dev.set_column(i, &(&dz * alpha));
        let dx = pt - &*x;
        p_xz += &dx * dz.transpose();
    }
    p_xz /= points.len() as f64;

    let s_r = robust_cholesky(r)?.l();
    let s_zz = qr_factor(&[&z_dev, &s_r]);

    // K·(S_zz·S_zzᵀ) = P_xz via two triangular solves.
    let w_t = s_zz
        .solve_lower_triangular(&p_xz.transpose())
        .ok_or(FilterError::NumericallyUnstable("singular innovation factor"))?;
    let k_t = s_zz
        .transpose()
        .solve_upper_triangular(&w_t)
        .ok_or(FilterError::NumericallyUnstable("singular innovation factor"))?;
    let k = k_t.transpose();

    let z_dyn = DVector::from_column_slice(z.as_slice());
    let innovation = &z_dyn - &z_pred;

    // Downdate first: a failure must leave the previous (x, L) untouched.
    let mut l_new = l.clone();
    cholesky_downdate(&mut l_new, &(&k * &s_zz))?;

    *x += &k * innovation;
    *l = l_new;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{ConstantAcceleration, ConstantVelocity};
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;

    fn meas_noise(std: f64) -> StateCov {
        StateCov::identity(3, 3) * std * std
    }

    fn symmetry_error(m: &StateCov) -> f64 {
        (m - m.transpose()).norm() / m.norm().max(1.0)
    }

    #[test]
    fn qr_factor_reconstructs_gram_matrix() {
        let a = DMatrix::from_row_slice(3, 5, &[
            1.0, 0.2, -0.3, 0.5, 0.0, //
            0.0, 2.0, 0.7, -0.1, 0.4, //
            0.3, -0.5, 1.5, 0.2, 0.9,
        ]);
        let l = qr_factor(&[&a]);
        let reconstructed = &l * l.transpose();
        let expected = &a * a.transpose();
        assert!((reconstructed - expected).norm() < 1e-10);
        for j in 0..3 {
            assert!(l[(j, j)] >= 0.0, "factor diagonal must be non-negative");
        }
    }

    #[test]
    fn downdate_matches_explicit_subtraction() {
        let p = DMatrix::from_row_slice(3, 3, &[
            4.0, 1.0, 0.5, //
            1.0, 3.0, 0.2, //
            0.5, 0.2, 2.0,
        ]);
        let mut l = robust_cholesky(&p).unwrap().l();
        let u = DMatrix::from_row_slice(3, 1, &[0.5, 0.3, 0.1]);
        cholesky_downdate(&mut l, &u).unwrap();
        let expected = &p - &u * u.transpose();
        assert!(((&l * l.transpose()) - expected).norm() < 1e-10);
    }

    #[test]
    fn downdate_rejects_indefinite_result() {
        let mut l = StateCov::identity(3, 3);
        let u = DMatrix::from_row_slice(3, 1, &[2.0, 0.0, 0.0]);
        assert_eq!(
            cholesky_downdate(&mut l, &u),
            Err(FilterError::NumericallyUnstable(
                "downdate lost positive definiteness"
            ))
        );
    }

    #[test]
    fn robust_cholesky_recovers_singular_matrix() {
        // Rank-deficient white-noise-acceleration Q: plain Cholesky fails,
        // the jitter ladder must still produce a usable factor.
        let q = ConstantVelocity::default().process_noise(0.1);
        let l = robust_cholesky(&q).unwrap().l();
        assert!(((&l * l.transpose()) - &q).norm() < 1e-6);
    }

    #[test]
    fn ckf_tracks_linear_motion() {
        let model = ConstantVelocity::new(0.5, 10.0, 100.0);
        let filter = CubatureFilter::Standard;
        let mut x = StateVec::zeros(6);
        let mut p = filter.initial_covariance(&model).unwrap();

        // Target moves along +x at 10 m/s, exact measurements.
        let r = meas_noise(0.1);
        for k in 1..=10 {
            let t = k as f64 * 0.1;
            filter.predict(&mut x, &mut p, &model, 0.1).unwrap();
            let z = Vec3::new(10.0 * t, 0.0, 0.0);
            filter.update(&mut x, &mut p, &model, &z, &r).unwrap();
        }
        assert_abs_diff_eq!(x[0], 10.0, epsilon = 0.2);
        assert_abs_diff_eq!(x[3], 10.0, epsilon = 0.5);
    }

    #[test]
    fn cv_zero_noise_error_is_monotone() {
        // Stationary target at the origin, exact measurements, no process
        // noise: the squared position error must never grow.
        let model = ConstantVelocity::new(0.0, 10.0, 1.0);
        let filter = CubatureFilter::Standard;
        let mut x = StateVec::zeros(6);
        x[0] = 1.0;
        let mut p = filter.initial_covariance(&model).unwrap();
        let r = meas_noise(0.1);
        let truth = Vec3::zeros();

        let mut errors = Vec::new();
        for _ in 0..8 {
            filter.predict(&mut x, &mut p, &model, 0.1).unwrap();
            filter.update(&mut x, &mut p, &model, &truth, &r).unwrap();
            errors.push(x[0] * x[0] + x[1] * x[1] + x[2] * x[2]);
        }
        for pair in errors.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9, "error grew: {pair:?}");
        }
        assert!(*errors.last().unwrap() < 1e-6);
    }

    #[test]
    fn ckf_covariance_stays_symmetric_positive() {
        let model = ConstantAcceleration::default();
        let filter = CubatureFilter::Standard;
        let mut x = StateVec::zeros(9);
        let mut p = filter.initial_covariance(&model).unwrap();
        let r = meas_noise(2.0);

        for k in 0..20 {
            filter.predict(&mut x, &mut p, &model, 0.1).unwrap();
            let z = Vec3::new(k as f64, 0.5 * k as f64, 0.0);
            filter.update(&mut x, &mut p, &model, &z, &r).unwrap();
        }
        assert!(symmetry_error(&p) < 1e-9);
        let eigen = p.clone().symmetric_eigenvalues();
        assert!(eigen.iter().all(|&e| e > -1e-9), "eigenvalues {eigen:?}");
    }

    #[test]
    fn ckf_and_srckf_agree() {
        let model = ConstantVelocity::default();
        let ckf = CubatureFilter::Standard;
        let srckf = CubatureFilter::SquareRoot;

        let mut x_a = StateVec::zeros(6);
        let mut x_b = StateVec::zeros(6);
        let mut p = ckf.initial_covariance(&model).unwrap();
        let mut l = srckf.initial_covariance(&model).unwrap();
        let r = meas_noise(2.0);

        for k in 1..=8 {
            let t = k as f64 * 0.1;
            ckf.predict(&mut x_a, &mut p, &model, 0.1).unwrap();
            srckf.predict(&mut x_b, &mut l, &model, 0.1).unwrap();
            let z = Vec3::new(4.0 * t, -2.0 * t, 1.0);
            ckf.update(&mut x_a, &mut p, &model, &z, &r).unwrap();
            srckf.update(&mut x_b, &mut l, &model, &z, &r).unwrap();
        }

        assert!((&x_a - &x_b).norm() < 1e-6, "state mismatch: {x_a} vs {x_b}");
        let p_sr = srckf.full_covariance(&l);
        assert!(
            (&p - &p_sr).norm() < 1e-6,
            "covariance mismatch (Frobenius {})",
            (&p - &p_sr).norm()
        );
    }

    #[test]
    fn srckf_factor_keeps_positive_diagonal() {
        let model = ConstantAcceleration::default();
        let filter = CubatureFilter::SquareRoot;
        let mut x = StateVec::zeros(9);
        let mut l = filter.initial_covariance(&model).unwrap();
        let r = meas_noise(2.0);

        for k in 0..15 {
            filter.predict(&mut x, &mut l, &model, 0.1).unwrap();
            let z = Vec3::new(2.0 * k as f64, 0.0, -1.0);
            filter.update(&mut x, &mut l, &model, &z, &r).unwrap();
        }
        for j in 0..9 {
            assert!(l[(j, j)] > 0.0, "factor diagonal must stay positive");
        }
    }
}
