//! The predict/update recurrence shared by the laser and radar paths.
//!
//! The core only owns the estimate `(x, P)`. Transition, process noise,
//! observation and measurement noise matrices are handed in on every call,
//! so the same core serves the linear laser model and the linearized radar
//! model without any per-sensor fields being swapped in and out.

use std::f64::consts::PI;

use nalgebra::{Matrix3, Matrix3x4, SMatrix, SVector, Vector3};

use crate::error::{FusionError, Result};
use crate::measurement::SensorKind;
use crate::{StateCovariance, StateVector, STATE_DIM};

/// Index of the bearing component in a radar measurement vector
const BEARING: usize = 1;

/// Wraps an angle into (-pi, pi]
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(2.0 * PI);
    if wrapped > PI {
        wrapped - 2.0 * PI
    } else {
        wrapped
    }
}

/// State estimate and covariance of a single track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanCore {
    /// State vector x
    x: StateVector,
    /// State covariance P
    /// Low P -> High Confidence in the state
    /// High P -> Low Confidence in the state
    p: StateCovariance,
}

impl KalmanCore {
    pub fn new(x: StateVector, p: StateCovariance) -> Self {
        Self { x, p }
    }

    pub fn state(&self) -> &StateVector {
        &self.x
    }

    pub fn covariance(&self) -> &StateCovariance {
        &self.p
    }

    /// Propagates the estimate through the motion model
    ///
    /// # Arguments
    ///
    /// * `f` - The state transition matrix (F)
    /// * `q` - The process noise covariance (Q)
    pub fn predict(&mut self, f: &StateCovariance, q: &StateCovariance) {
        self.x = f * self.x;
        self.p = f * self.p * f.transpose() + q;
    }

    /// Standard Kalman update for a linear observation model
    ///
    /// # Arguments
    ///
    /// * `z` - The measurement
    /// * `h` - The observation matrix (H)
    /// * `r` - The measurement noise covariance (R)
    /// * `sensor` - Which sensor produced `z`, used for fault reporting
    pub fn update<const M: usize>(
        &mut self,
        z: &SVector<f64, M>,
        h: &SMatrix<f64, M, STATE_DIM>,
        r: &SMatrix<f64, M, M>,
        sensor: SensorKind,
    ) -> Result<()> {
        let y = z - h * self.x;
        self.correct(&y, h, r, sensor)
    }

    /// Extended Kalman update for the radar observation model
    ///
    /// The residual is taken against `hx`, the nonlinear observation of the
    /// current state, while the Jacobian `hj` only enters the gain. The
    /// bearing residual is wrapped into (-pi, pi] before it is applied.
    ///
    /// # Arguments
    ///
    /// * `z` - The radar measurement `| rho | phi | rho_dot |`
    /// * `hx` - h(x) evaluated at the current state
    /// * `hj` - The Jacobian of h at the current state
    /// * `r` - The radar measurement noise covariance (R)
    pub fn update_nonlinear(
        &mut self,
        z: &Vector3<f64>,
        hx: &Vector3<f64>,
        hj: &Matrix3x4<f64>,
        r: &Matrix3<f64>,
    ) -> Result<()> {
        let mut y = z - hx;
        y[BEARING] = normalize_angle(y[BEARING]);
        self.correct(&y, hj, r, SensorKind::Radar)
    }

    /// Applies innovation `y` through the gain built from `h` and `r`.
    /// Leaves the estimate untouched on failure.
    fn correct<const M: usize>(
        &mut self,
        y: &SVector<f64, M>,
        h: &SMatrix<f64, M, STATE_DIM>,
        r: &SMatrix<f64, M, M>,
        sensor: SensorKind,
    ) -> Result<()> {
        let ht = h.transpose();
        let s = h * self.p * ht + r;
        let s_inv = s
            .try_inverse()
            .filter(|inv| inv.iter().all(|v| v.is_finite()))
            .ok_or(FusionError::SingularInnovation { sensor })?;
        let k = self.p * ht * s_inv;

        let x = self.x + k * y;
        let p = (StateCovariance::identity() - k * h) * self.p;
        if x.iter().chain(p.iter()).any(|v| !v.is_finite()) {
            return Err(FusionError::SingularInnovation { sensor });
        }

        self.x = x;
        self.p = p;
        Ok(())
    }
}
