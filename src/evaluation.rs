use statrs::statistics::Statistics;

use crate::error::{FusionError, Result};
use crate::{StateVector, STATE_DIM};

/// Root mean squared error of each state component
///
/// # Arguments
///
/// * `estimates` - The filter output
/// * `ground_truth` - The true states, one per estimate
pub fn rmse(estimates: &[StateVector], ground_truth: &[StateVector]) -> Result<StateVector> {
    if estimates.is_empty() {
        return Err(FusionError::EmptyEstimates);
    }
    if estimates.len() != ground_truth.len() {
        return Err(FusionError::LengthMismatch {
            estimates: estimates.len(),
            ground_truth: ground_truth.len(),
        });
    }

    let mut rmse = StateVector::zeros();
    for i in 0..STATE_DIM {
        let mse = estimates
            .iter()
            .zip(ground_truth)
            .map(|(estimate, truth)| (estimate[i] - truth[i]).powi(2))
            .mean();
        rmse[i] = mse.sqrt();
    }
    Ok(rmse)
}
