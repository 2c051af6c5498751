use std::fmt;

use nalgebra::{Vector2, Vector3};
use serde::Deserialize;

use crate::error::{FusionError, Result};
use crate::jacobian::polar_to_cartesian;

/// Number of values a laser reading carries (px, py)
pub const LASER_DIM: usize = 2;

/// Number of values a radar reading carries (rho, phi, rho_dot)
pub const RADAR_DIM: usize = 3;

/// The two sensor modalities feeding the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Linear sensor reporting Cartesian position
    Laser,
    /// Nonlinear sensor reporting range, bearing and range-rate
    Radar,
}

impl SensorKind {
    /// Length of the raw measurement vector for this sensor
    pub fn dimension(self) -> usize {
        match self {
            SensorKind::Laser => LASER_DIM,
            SensorKind::Radar => RADAR_DIM,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Laser => f.write_str("laser"),
            SensorKind::Radar => f.write_str("radar"),
        }
    }
}

/// A single timestamped sensor reading.
///
/// Each variant carries a fixed-shape payload, so a laser reading can never
/// be handed to the radar update path or vice versa.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Laser {
        /// Microseconds
        timestamp: u64,
        /// | px | py |
        position: Vector2<f64>,
    },
    Radar {
        /// Microseconds
        timestamp: u64,
        /// | rho | phi | rho_dot |, phi in radians
        polar: Vector3<f64>,
    },
}

impl Measurement {
    pub fn laser(timestamp: u64, px: f64, py: f64) -> Self {
        Measurement::Laser {
            timestamp,
            position: Vector2::new(px, py),
        }
    }

    pub fn radar(timestamp: u64, rho: f64, phi: f64, rho_dot: f64) -> Self {
        Measurement::Radar {
            timestamp,
            polar: Vector3::new(rho, phi, rho_dot),
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Measurement::Laser { timestamp, .. } | Measurement::Radar { timestamp, .. } => {
                *timestamp
            }
        }
    }

    pub fn sensor(&self) -> SensorKind {
        match self {
            Measurement::Laser { .. } => SensorKind::Laser,
            Measurement::Radar { .. } => SensorKind::Radar,
        }
    }

    /// Rejects readings the filter must never see: non-finite components
    /// and, for the radar, a negative range
    pub fn validate(&self) -> Result<()> {
        let values = match self {
            Measurement::Laser { position, .. } => position.as_slice(),
            Measurement::Radar { polar, .. } => polar.as_slice(),
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FusionError::NonFiniteMeasurement {
                sensor: self.sensor(),
            });
        }
        if let Measurement::Radar { polar, .. } = self {
            if polar[0] < 0.0 {
                return Err(FusionError::NegativeRange { range: polar[0] });
            }
        }
        Ok(())
    }

    /// The measured position in Cartesian coordinates
    pub fn cartesian_position(&self) -> Vector2<f64> {
        match self {
            Measurement::Laser { position, .. } => *position,
            Measurement::Radar { polar, .. } => polar_to_cartesian(polar[0], polar[1]),
        }
    }
}

/// An untyped measurement record as delivered by an external reader.
///
/// Convert it with `Measurement::try_from` before handing it to the filter;
/// the conversion is where wrong lengths and garbage values get rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawMeasurement {
    pub sensor: SensorKind,
    pub timestamp: u64,
    pub values: Vec<f64>,
}

impl TryFrom<&RawMeasurement> for Measurement {
    type Error = FusionError;

    fn try_from(raw: &RawMeasurement) -> Result<Self> {
        let expected = raw.sensor.dimension();
        if raw.values.len() != expected {
            return Err(FusionError::MalformedMeasurement {
                sensor: raw.sensor,
                expected,
                actual: raw.values.len(),
            });
        }

        let v = &raw.values;
        let measurement = match raw.sensor {
            SensorKind::Laser => Measurement::laser(raw.timestamp, v[0], v[1]),
            SensorKind::Radar => Measurement::radar(raw.timestamp, v[0], v[1], v[2]),
        };
        measurement.validate()?;
        Ok(measurement)
    }
}

impl TryFrom<RawMeasurement> for Measurement {
    type Error = FusionError;

    fn try_from(raw: RawMeasurement) -> Result<Self> {
        Measurement::try_from(&raw)
    }
}
