//! Linearization of the radar observation model.
//!
//! The radar reports `| rho | phi | rho_dot |` while the filter tracks
//! `| px | py | vx | vy |` in Cartesian space, so the radar update needs the
//! true observation function `h(x)` for the residual and its Jacobian `Hj`
//! for the gain.

use nalgebra::{Matrix3x4, Vector2, Vector3};

use crate::error::{FusionError, Result};
use crate::StateVector;

/// Below this squared range the radar geometry is undefined
pub const JACOBIAN_EPSILON: f64 = 1e-4;

fn checked_range_squared(px: f64, py: f64) -> Result<f64> {
    let range_squared = px * px + py * py;
    if !range_squared.is_finite() || range_squared < JACOBIAN_EPSILON {
        return Err(FusionError::DegenerateJacobian { range_squared });
    }
    Ok(range_squared)
}

/// Computes the 3x4 Jacobian of the radar observation function at `state`
///
/// # Arguments
///
/// * `state` - The state to linearize around, `| px | py | vx | vy |`
pub fn calculate_jacobian(state: &StateVector) -> Result<Matrix3x4<f64>> {
    let (px, py, vx, vy) = (state[0], state[1], state[2], state[3]);

    let c1 = checked_range_squared(px, py)?;
    let c2 = c1.sqrt();
    let c3 = c1 * c2;

    // | d rho     / d(px, py, vx, vy) |
    // | d phi     / d(px, py, vx, vy) |
    // | d rho_dot / d(px, py, vx, vy) |
    Ok(Matrix3x4::new(
        px / c2,
        py / c2,
        0.0,
        0.0,
        -py / c1,
        px / c1,
        0.0,
        0.0,
        py * (vx * py - vy * px) / c3,
        px * (vy * px - vx * py) / c3,
        px / c2,
        py / c2,
    ))
}

/// Evaluates the radar observation function `h(x)` at `state`
///
/// Returns `| rho | phi | rho_dot |` with `phi` in (-pi, pi]. Range-rate is
/// undefined at the origin, which is reported the same way as for the
/// Jacobian.
pub fn observe_polar(state: &StateVector) -> Result<Vector3<f64>> {
    let (px, py, vx, vy) = (state[0], state[1], state[2], state[3]);

    let rho = checked_range_squared(px, py)?.sqrt();
    let phi = py.atan2(px);
    let rho_dot = (px * vx + py * vy) / rho;

    Ok(Vector3::new(rho, phi, rho_dot))
}

/// Converts a radar range and bearing into a Cartesian position
pub fn polar_to_cartesian(rho: f64, phi: f64) -> Vector2<f64> {
    Vector2::new(rho * phi.cos(), rho * phi.sin())
}
