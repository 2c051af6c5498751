use thiserror::Error;

use crate::measurement::SensorKind;

pub type Result<T> = std::result::Result<T, FusionError>;

/// Faults raised by the filter, the measurement layer and the scoring helpers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    /// The radar Jacobian is undefined this close to the sensor origin
    #[error("radar jacobian undefined at range^2 = {range_squared:e} (target at sensor origin)")]
    DegenerateJacobian { range_squared: f64 },

    /// S = H·P·Hᵗ + R could not be inverted
    #[error("innovation covariance is singular during {sensor} update")]
    SingularInnovation { sensor: SensorKind },

    #[error("measurement timestamp {current} us is older than previous {previous} us")]
    OutOfOrder { previous: u64, current: u64 },

    #[error("{sensor} measurement needs {expected} values, got {actual}")]
    MalformedMeasurement {
        sensor: SensorKind,
        expected: usize,
        actual: usize,
    },

    #[error("{sensor} measurement contains a non-finite value")]
    NonFiniteMeasurement { sensor: SensorKind },

    #[error("radar range must be non-negative, got {range}")]
    NegativeRange { range: f64 },

    #[error("invalid filter configuration: {field} must be positive and finite")]
    InvalidConfig { field: &'static str },

    #[error("cannot read configuration file: {message}")]
    ConfigRead { message: String },

    #[error("cannot parse configuration file: {message}")]
    ConfigParse { message: String },

    #[error("cannot score an empty estimate sequence")]
    EmptyEstimates,

    #[error("{estimates} estimates but {ground_truth} ground truth states")]
    LengthMismatch {
        estimates: usize,
        ground_truth: usize,
    },
}

// Only the message of io and parse errors is kept
impl From<std::io::Error> for FusionError {
    fn from(err: std::io::Error) -> Self {
        FusionError::ConfigRead {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for FusionError {
    fn from(err: serde_json::Error) -> Self {
        FusionError::ConfigParse {
            message: err.to_string(),
        }
    }
}
