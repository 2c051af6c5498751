use nalgebra::{SMatrix, SVector};

pub mod error;
pub mod evaluation;
pub mod fusion;
pub mod jacobian;
pub mod kalman;
pub mod measurement;
pub mod plot;
pub mod scenario;

pub use error::{FusionError, Result};
pub use fusion::{Estimate, FusionConfig, FusionEkf};
pub use kalman::KalmanCore;
pub use measurement::{Measurement, RawMeasurement, SensorKind};
pub use plot::plot;

/// Size of the State Vector `| px | py | vx | vy |`
pub const STATE_DIM: usize = 4;

/// type alias for state vector
pub type StateVector = SVector<f64, STATE_DIM>;
pub type StateCovariance = SMatrix<f64, STATE_DIM, STATE_DIM>;
