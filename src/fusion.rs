use std::fs;
use std::path::Path;

use nalgebra::{Matrix2, Matrix2x4, Matrix3, Vector2, Vector3, Vector4};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{FusionError, Result};
use crate::jacobian::{calculate_jacobian, observe_polar};
use crate::kalman::KalmanCore;
use crate::measurement::{Measurement, SensorKind};
use crate::{StateCovariance, StateVector};

/// Timestamps are in microseconds
const MICROS_PER_SECOND: f64 = 1_000_000.0;

// R matrix (Measurement covariance)
// Low R -> High Confidence in the sensor
// High R -> Low Confidence in the sensor
const LASER_VARIANCE: f64 = 0.0225;
const RADAR_RANGE_VARIANCE: f64 = 0.09;
const RADAR_BEARING_VARIANCE: f64 = 0.0009;
const RADAR_RANGE_RATE_VARIANCE: f64 = 0.09;

// Q matrix (acceleration noise intensity per axis)
// Low Q -> High Confidence in predicted state
// High Q -> Low Confidence in predicted state
const NOISE_AX: f64 = 9.0;
const NOISE_AY: f64 = 9.0;

// P matrix (Initial state covariance)
// Position comes straight from the first reading, velocity is unknown
const INITIAL_POSITION_VARIANCE: f64 = 1.0;
const INITIAL_VELOCITY_VARIANCE: f64 = 1000.0;

/// Tuning constants of a fusion track, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Laser variance along x and y
    pub laser_variance: [f64; 2],
    /// Radar variance of range, bearing and range-rate
    pub radar_variance: [f64; 3],
    /// Acceleration noise intensity along x
    pub noise_ax: f64,
    /// Acceleration noise intensity along y
    pub noise_ay: f64,
    pub initial_position_variance: f64,
    pub initial_velocity_variance: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            laser_variance: [LASER_VARIANCE, LASER_VARIANCE],
            radar_variance: [
                RADAR_RANGE_VARIANCE,
                RADAR_BEARING_VARIANCE,
                RADAR_RANGE_RATE_VARIANCE,
            ],
            noise_ax: NOISE_AX,
            noise_ay: NOISE_AY,
            initial_position_variance: INITIAL_POSITION_VARIANCE,
            initial_velocity_variance: INITIAL_VELOCITY_VARIANCE,
        }
    }
}

impl FusionConfig {
    /// Loads a configuration from a JSON file, missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: FusionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Every variance must be positive so that R stays positive definite
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("laser_variance[0]", self.laser_variance[0]),
            ("laser_variance[1]", self.laser_variance[1]),
            ("radar_variance[0]", self.radar_variance[0]),
            ("radar_variance[1]", self.radar_variance[1]),
            ("radar_variance[2]", self.radar_variance[2]),
            ("noise_ax", self.noise_ax),
            ("noise_ay", self.noise_ay),
            ("initial_position_variance", self.initial_position_variance),
            ("initial_velocity_variance", self.initial_velocity_variance),
        ];
        match fields.iter().find(|(_, v)| !(v.is_finite() && *v > 0.0)) {
            Some((field, _)) => Err(FusionError::InvalidConfig { field: *field }),
            None => Ok(()),
        }
    }

    fn laser_covariance(&self) -> Matrix2<f64> {
        Matrix2::from_diagonal(&Vector2::from(self.laser_variance))
    }

    fn radar_covariance(&self) -> Matrix3<f64> {
        Matrix3::from_diagonal(&Vector3::from(self.radar_variance))
    }

    fn initial_covariance(&self) -> StateCovariance {
        StateCovariance::from_diagonal(&Vector4::new(
            self.initial_position_variance,
            self.initial_position_variance,
            self.initial_velocity_variance,
            self.initial_velocity_variance,
        ))
    }
}

/// Constant-velocity transition over `dt` seconds
///
/// | 1 0 dt 0  |
/// | 0 1 0  dt |
/// | 0 0 1  0  |
/// | 0 0 0  1  |
pub fn transition_matrix(dt: f64) -> StateCovariance {
    let mut f = StateCovariance::identity();
    f[(0, 2)] = dt;
    f[(1, 3)] = dt;
    f
}

/// Process noise of a random acceleration acting over `dt` seconds
///
/// Each axis gets the discretized white-acceleration block
/// `| dt^4/4  dt^3/2 |`
/// `| dt^3/2  dt^2   |` scaled by its own intensity, axes are uncoupled.
pub fn process_noise(dt: f64, noise_ax: f64, noise_ay: f64) -> StateCovariance {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;

    let mut q = StateCovariance::zeros();
    for (pos, vel, noise) in [(0, 2, noise_ax), (1, 3, noise_ay)] {
        q[(pos, pos)] = dt4 / 4.0 * noise;
        q[(pos, vel)] = dt3 / 2.0 * noise;
        q[(vel, pos)] = dt3 / 2.0 * noise;
        q[(vel, vel)] = dt2 * noise;
    }
    q
}

/// Result of one predict/update cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Timestamp of the measurement that produced this estimate
    pub timestamp: u64,
    pub sensor: SensorKind,
    /// Seconds elapsed since the previous measurement
    pub dt: f64,
    /// State after prediction, before the measurement was applied
    pub prior: StateVector,
    pub state: StateVector,
    pub covariance: StateCovariance,
}

fn reject(measurement: &Measurement, err: FusionError) -> FusionError {
    warn!(
        sensor = %measurement.sensor(),
        timestamp = measurement.timestamp(),
        %err,
        "measurement rejected"
    );
    err
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Track {
    core: KalmanCore,
    previous_timestamp: u64,
}

/// Laser/radar fusion for one tracked object
#[derive(Debug, Clone)]
pub struct FusionEkf {
    config: FusionConfig,
    /// Observation matrix of the laser
    /// | 1 0 0 0 |
    /// | 0 1 0 0 |
    h_laser: Matrix2x4<f64>,
    r_laser: Matrix2<f64>,
    r_radar: Matrix3<f64>,
    /// `None` until the first measurement arrives
    track: Option<Track>,
}

impl FusionEkf {
    /// Creates an uninitialized filter
    ///
    /// # Arguments
    ///
    /// * `config` - Sensor noise, process noise and initial covariance
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            h_laser: Matrix2x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0),
            r_laser: config.laser_covariance(),
            r_radar: config.radar_covariance(),
            track: None,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.track.is_some()
    }

    pub fn state(&self) -> Option<&StateVector> {
        self.track.as_ref().map(|t| t.core.state())
    }

    pub fn covariance(&self) -> Option<&StateCovariance> {
        self.track.as_ref().map(|t| t.core.covariance())
    }

    /// Drops the current track, the next measurement starts a new one.
    /// This can be used when we lose track of the object
    pub fn reset(&mut self) {
        if self.track.take().is_some() {
            info!("fusion track reset");
        }
    }

    /// Feeds one measurement through the filter
    ///
    /// The first measurement only initializes the track and yields `None`.
    /// Every later one runs predict and update and yields the new estimate.
    /// On error the filter is left exactly as it was before the call.
    pub fn process_measurement(&mut self, measurement: &Measurement) -> Result<Option<Estimate>> {
        if let Err(err) = measurement.validate() {
            return Err(reject(measurement, err));
        }

        let Some(track) = self.track else {
            self.initialize(measurement);
            return Ok(None);
        };

        match self.cycle(track, measurement) {
            Ok((next, estimate)) => {
                self.track = Some(next);
                Ok(Some(estimate))
            }
            Err(err) => Err(reject(measurement, err)),
        }
    }

    fn initialize(&mut self, measurement: &Measurement) {
        // Radar range-rate alone does not give a Cartesian velocity
        let position = measurement.cartesian_position();
        let x = Vector4::new(position.x, position.y, 0.0, 0.0);

        info!(
            sensor = %measurement.sensor(),
            timestamp = measurement.timestamp(),
            px = x[0],
            py = x[1],
            "fusion track initialized"
        );
        self.track = Some(Track {
            core: KalmanCore::new(x, self.config.initial_covariance()),
            previous_timestamp: measurement.timestamp(),
        });
    }

    /// Runs predict and update on a copy of `track`
    fn cycle(&self, mut track: Track, measurement: &Measurement) -> Result<(Track, Estimate)> {
        let timestamp = measurement.timestamp();
        if timestamp < track.previous_timestamp {
            return Err(FusionError::OutOfOrder {
                previous: track.previous_timestamp,
                current: timestamp,
            });
        }
        let dt = (timestamp - track.previous_timestamp) as f64 / MICROS_PER_SECOND;
        track.previous_timestamp = timestamp;

        let f = transition_matrix(dt);
        let q = process_noise(dt, self.config.noise_ax, self.config.noise_ay);
        track.core.predict(&f, &q);
        let prior = *track.core.state();

        match measurement {
            Measurement::Radar { polar, .. } => {
                let hj = calculate_jacobian(&prior)?;
                let hx = observe_polar(&prior)?;
                track.core.update_nonlinear(polar, &hx, &hj, &self.r_radar)?;
            }
            Measurement::Laser { position, .. } => {
                track
                    .core
                    .update(position, &self.h_laser, &self.r_laser, SensorKind::Laser)?;
            }
        }

        debug!(
            sensor = %measurement.sensor(),
            dt,
            px = track.core.state()[0],
            py = track.core.state()[1],
            vx = track.core.state()[2],
            vy = track.core.state()[3],
            "fusion cycle"
        );

        let estimate = Estimate {
            timestamp,
            sensor: measurement.sensor(),
            dt,
            prior,
            state: *track.core.state(),
            covariance: *track.core.covariance(),
        };
        Ok((track, estimate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn filter() -> FusionEkf {
        FusionEkf::new(FusionConfig::default()).unwrap()
    }

    #[test]
    fn test_zero_dt_models_are_neutral() {
        assert_eq!(transition_matrix(0.0), StateCovariance::identity());
        assert_eq!(process_noise(0.0, 9.0, 9.0), StateCovariance::zeros());
    }

    #[test]
    fn test_process_noise_layout() {
        let q = process_noise(0.1, 9.0, 4.0);
        assert!((q[(0, 0)] - 0.0001 / 4.0 * 9.0).abs() < EPSILON);
        assert!((q[(0, 2)] - 0.001 / 2.0 * 9.0).abs() < EPSILON);
        assert!((q[(2, 0)] - q[(0, 2)]).abs() < EPSILON);
        assert!((q[(2, 2)] - 0.01 * 9.0).abs() < EPSILON);
        assert!((q[(1, 1)] - 0.0001 / 4.0 * 4.0).abs() < EPSILON);
        assert!((q[(3, 3)] - 0.01 * 4.0).abs() < EPSILON);
        // Axes are uncoupled
        assert_eq!(q[(0, 1)], 0.0);
        assert_eq!(q[(0, 3)], 0.0);
        assert_eq!(q[(2, 3)], 0.0);
    }

    #[test]
    fn test_init_from_laser() {
        let mut ekf = filter();
        assert!(!ekf.is_initialized());
        assert!(ekf.state().is_none());

        let out = ekf.process_measurement(&Measurement::laser(0, 3.0, 4.0)).unwrap();
        assert!(out.is_none());
        assert!(ekf.is_initialized());
        assert_eq!(ekf.state(), Some(&Vector4::new(3.0, 4.0, 0.0, 0.0)));

        let p = ekf.covariance().unwrap();
        assert_eq!(
            *p,
            StateCovariance::from_diagonal(&Vector4::new(1.0, 1.0, 1000.0, 1000.0))
        );
    }

    #[test]
    fn test_init_from_radar_discards_range_rate() {
        let mut ekf = filter();
        ekf.process_measurement(&Measurement::radar(0, 5.0, 0.0, 0.0)).unwrap();
        let x = ekf.state().unwrap();
        assert!((x - Vector4::new(5.0, 0.0, 0.0, 0.0)).amax() < EPSILON);

        let mut ekf = filter();
        ekf.process_measurement(&Measurement::radar(0, 2.0, std::f64::consts::FRAC_PI_2, 7.0))
            .unwrap();
        let x = ekf.state().unwrap();
        assert!((x - Vector4::new(0.0, 2.0, 0.0, 0.0)).amax() < EPSILON);
    }

    #[test]
    fn test_two_laser_cycle() {
        let mut ekf = filter();
        ekf.process_measurement(&Measurement::laser(1_000_000, 1.0, 1.0)).unwrap();
        let estimate = ekf
            .process_measurement(&Measurement::laser(1_100_000, 1.1, 1.0))
            .unwrap()
            .unwrap();

        assert!((estimate.dt - 0.1).abs() < EPSILON);
        assert_eq!(estimate.sensor, SensorKind::Laser);
        // Zero initial velocity: prediction stays put
        assert!((estimate.prior - Vector4::new(1.0, 1.0, 0.0, 0.0)).amax() < EPSILON);
        // Correction moves towards the reading
        assert!(estimate.state[0] > 1.0 && estimate.state[0] < 1.1);
        assert!(estimate.state[2] > 0.0);
        assert!(estimate.covariance[(0, 0)] < 1.0);
        assert!(estimate.covariance[(1, 1)] < 1.0);
        assert!(estimate.covariance[(2, 2)] < 1000.0);
    }

    #[test]
    fn test_zero_dt_still_fuses() {
        let mut ekf = filter();
        ekf.process_measurement(&Measurement::laser(500, 1.0, 1.0)).unwrap();
        let estimate = ekf
            .process_measurement(&Measurement::radar(
                500,
                2.0_f64.sqrt(),
                std::f64::consts::FRAC_PI_4,
                0.0,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(estimate.dt, 0.0);
        assert!((estimate.prior - Vector4::new(1.0, 1.0, 0.0, 0.0)).amax() < EPSILON);
        assert!(estimate.covariance[(0, 0)] < 1.0);
    }

    #[test]
    fn test_out_of_order_is_rejected_without_side_effects() {
        let mut ekf = filter();
        ekf.process_measurement(&Measurement::laser(2_000_000, 1.0, 1.0)).unwrap();
        ekf.process_measurement(&Measurement::laser(2_050_000, 1.05, 1.0)).unwrap();
        let state = *ekf.state().unwrap();
        let covariance = *ekf.covariance().unwrap();

        let err = ekf
            .process_measurement(&Measurement::laser(1_999_999, 9.0, 9.0))
            .unwrap_err();
        assert_eq!(
            err,
            FusionError::OutOfOrder {
                previous: 2_050_000,
                current: 1_999_999
            }
        );
        assert_eq!(ekf.state(), Some(&state));
        assert_eq!(ekf.covariance(), Some(&covariance));

        // The previous timestamp did not move either
        let next = ekf
            .process_measurement(&Measurement::laser(2_100_000, 1.1, 1.0))
            .unwrap()
            .unwrap();
        assert!((next.dt - 0.05).abs() < EPSILON);
    }

    #[test]
    fn test_radar_at_origin_skips_update() {
        let mut ekf = filter();
        ekf.process_measurement(&Measurement::laser(0, 0.0, 0.0)).unwrap();
        let before = *ekf.state().unwrap();

        let err = ekf
            .process_measurement(&Measurement::radar(100_000, 0.1, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, FusionError::DegenerateJacobian { .. }));
        assert_eq!(ekf.state(), Some(&before));
        assert!(ekf.state().unwrap().iter().all(|v| v.is_finite()));

        // Laser readings still get through
        assert!(ekf
            .process_measurement(&Measurement::laser(200_000, 0.5, 0.5))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_non_finite_first_reading_leaves_filter_uninitialized() {
        let mut ekf = filter();
        let err = ekf
            .process_measurement(&Measurement::laser(0, f64::NAN, 1.0))
            .unwrap_err();
        assert_eq!(
            err,
            FusionError::NonFiniteMeasurement {
                sensor: SensorKind::Laser
            }
        );
        assert!(!ekf.is_initialized());

        // The next valid readings start and drive a healthy track
        assert!(ekf
            .process_measurement(&Measurement::laser(100_000, 1.0, 1.0))
            .unwrap()
            .is_none());
        let estimate = ekf
            .process_measurement(&Measurement::radar(200_000, 1.5, 0.7, 0.0))
            .unwrap()
            .unwrap();
        assert!(estimate.state.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_bad_readings_mid_track_leave_state_untouched() {
        let mut ekf = filter();
        ekf.process_measurement(&Measurement::laser(0, 1.0, 1.0)).unwrap();
        ekf.process_measurement(&Measurement::laser(100_000, 1.1, 1.0)).unwrap();
        let before = ekf.clone();

        let err = ekf
            .process_measurement(&Measurement::laser(150_000, f64::INFINITY, 1.0))
            .unwrap_err();
        assert_eq!(
            err,
            FusionError::NonFiniteMeasurement {
                sensor: SensorKind::Laser
            }
        );
        assert_eq!(ekf.state(), before.state());
        assert_eq!(ekf.covariance(), before.covariance());

        let err = ekf
            .process_measurement(&Measurement::radar(150_000, 1.0, f64::NAN, 0.0))
            .unwrap_err();
        assert_eq!(
            err,
            FusionError::NonFiniteMeasurement {
                sensor: SensorKind::Radar
            }
        );

        let err = ekf
            .process_measurement(&Measurement::radar(150_000, -3.0, 0.0, 0.0))
            .unwrap_err();
        assert_eq!(err, FusionError::NegativeRange { range: -3.0 });
        assert_eq!(ekf.state(), before.state());
        assert_eq!(ekf.covariance(), before.covariance());

        // Elapsed time is still measured from the last accepted reading
        let next = ekf
            .process_measurement(&Measurement::laser(200_000, 1.2, 1.0))
            .unwrap()
            .unwrap();
        assert!((next.dt - 0.1).abs() < EPSILON);
    }

    #[test]
    fn test_reset_returns_to_uninitialized() {
        let mut ekf = filter();
        ekf.process_measurement(&Measurement::laser(0, 1.0, 1.0)).unwrap();
        ekf.reset();
        assert!(!ekf.is_initialized());

        // Earlier timestamp is fine for a fresh track
        let out = ekf.process_measurement(&Measurement::radar(0, 5.0, 0.0, 0.0)).unwrap();
        assert!(out.is_none());
        assert!((ekf.state().unwrap()[0] - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FusionConfig {
            radar_variance: [0.09, 0.0, 0.09],
            ..FusionConfig::default()
        };
        assert_eq!(
            FusionEkf::new(config).err(),
            Some(FusionError::InvalidConfig {
                field: "radar_variance[1]"
            })
        );

        let config = FusionConfig {
            noise_ay: f64::NAN,
            ..FusionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_json_file() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("fusion_ekf_config_{}.json", std::process::id()));
        fs::write(&good, r#"{"noise_ax": 4.0, "noise_ay": 2.0}"#).unwrap();
        let config = FusionConfig::from_json_file(&good).unwrap();
        assert_eq!(config.noise_ax, 4.0);
        assert_eq!(config.noise_ay, 2.0);

        let ekf = FusionEkf::new(config).unwrap();
        assert_eq!(ekf.config(), &config);

        fs::write(&good, "{ not json").unwrap();
        assert!(matches!(
            FusionConfig::from_json_file(&good),
            Err(FusionError::ConfigParse { .. })
        ));

        fs::write(&good, r#"{"noise_ax": -1.0}"#).unwrap();
        assert_eq!(
            FusionConfig::from_json_file(&good),
            Err(FusionError::InvalidConfig { field: "noise_ax" })
        );
        fs::remove_file(&good).unwrap();

        assert!(matches!(
            FusionConfig::from_json_file(dir.join("fusion_ekf_missing_config.json")),
            Err(FusionError::ConfigRead { .. })
        ));
    }

    #[test]
    fn test_config_json_defaults() {
        let config: FusionConfig = serde_json::from_str(r#"{"noise_ax": 5.0}"#).unwrap();
        assert_eq!(config.noise_ax, 5.0);
        assert_eq!(config.noise_ay, NOISE_AY);
        assert_eq!(config.laser_variance, [LASER_VARIANCE; 2]);
    }
}
