use nalgebra::Vector2;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{FusionError, Result};
use crate::fusion::FusionConfig;
use crate::kalman::normalize_angle;
use crate::measurement::Measurement;
use crate::StateVector;

/// One simulated reading together with the true state it was drawn from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds since the start of the run
    pub time: f64,
    pub measurement: Measurement,
    pub truth: StateVector,
}

/// A target moving on a circle at constant speed, observed alternately by
/// the laser and the radar sitting at the origin
pub struct CircularTarget {
    center: Vector2<f64>,
    radius: f64,
    angular_velocity: f64,
    laser_noise: Normal<f64>,
    range_noise: Normal<f64>,
    bearing_noise: Normal<f64>,
    range_rate_noise: Normal<f64>,
}

fn normal(variance: f64, field: &'static str) -> Result<Normal<f64>> {
    Normal::new(0.0, variance.sqrt()).map_err(|_| FusionError::InvalidConfig { field })
}

impl CircularTarget {
    /// Create a new CircularTarget instance
    ///
    /// # Arguments
    ///
    /// * `center` - Center of the circle
    /// * `radius` - Radius of the circle
    /// * `rpm` - Revolutions per minute
    /// * `config` - Sensor variances used to corrupt the readings
    pub fn new(
        center: Vector2<f64>,
        radius: f64,
        rpm: f64,
        config: &FusionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            center,
            radius,
            angular_velocity: rpm * std::f64::consts::PI / 30.0,
            laser_noise: normal(config.laser_variance[0], "laser_variance[0]")?,
            range_noise: normal(config.radar_variance[0], "radar_variance[0]")?,
            bearing_noise: normal(config.radar_variance[1], "radar_variance[1]")?,
            range_rate_noise: normal(config.radar_variance[2], "radar_variance[2]")?,
        })
    }

    /// Gets the true state `| px | py | vx | vy |` at a given time
    pub fn state(&self, time: f64) -> StateVector {
        let angle = time * self.angular_velocity;
        let speed = self.radius * self.angular_velocity;
        StateVector::new(
            self.center.x + self.radius * angle.cos(),
            self.center.y + self.radius * angle.sin(),
            -speed * angle.sin(),
            speed * angle.cos(),
        )
    }

    /// Gets a noisy laser reading of `truth`
    pub fn laser_measurement(
        &self,
        timestamp: u64,
        truth: &StateVector,
        rng: &mut StdRng,
    ) -> Measurement {
        Measurement::laser(
            timestamp,
            truth[0] + self.laser_noise.sample(rng),
            truth[1] + self.laser_noise.sample(rng),
        )
    }

    /// Gets a noisy radar reading of `truth`
    pub fn radar_measurement(
        &self,
        timestamp: u64,
        truth: &StateVector,
        rng: &mut StdRng,
    ) -> Measurement {
        let (px, py, vx, vy) = (truth[0], truth[1], truth[2], truth[3]);
        let rho = px.hypot(py);
        let rho_dot = if rho > 0.0 {
            (px * vx + py * vy) / rho
        } else {
            0.0
        };

        Measurement::radar(
            timestamp,
            (rho + self.range_noise.sample(rng)).max(0.0),
            normalize_angle(py.atan2(px) + self.bearing_noise.sample(rng)),
            rho_dot + self.range_rate_noise.sample(rng),
        )
    }

    /// Generates `steps` readings `dt` seconds apart, laser first, then
    /// alternating with the radar
    ///
    /// # Arguments
    ///
    /// * `start_timestamp` - Timestamp of the first reading in microseconds
    /// * `steps` - Number of readings
    /// * `dt` - Seconds between readings
    /// * `seed` - Seed of the noise generator, equal seeds give equal runs
    pub fn simulate(
        &self,
        start_timestamp: u64,
        steps: usize,
        dt: f64,
        seed: u64,
    ) -> Vec<Sample> {
        let mut rng = StdRng::seed_from_u64(seed);
        let step_micros = (dt * 1_000_000.0).round() as u64;

        (0..steps)
            .map(|i| {
                let timestamp = start_timestamp + i as u64 * step_micros;
                let time = (i as u64 * step_micros) as f64 / 1_000_000.0;
                let truth = self.state(time);
                let measurement = if i % 2 == 0 {
                    self.laser_measurement(timestamp, &truth, &mut rng)
                } else {
                    self.radar_measurement(timestamp, &truth, &mut rng)
                };
                Sample {
                    time,
                    measurement,
                    truth,
                }
            })
            .collect()
    }
}
