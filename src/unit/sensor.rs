use std::fmt::{Display, Formatter};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Range an air conditioner can be set to, also used to keep the simulated
/// room believable.
pub const TEMPERATURE_RANGE: (f64, f64) = (16.0, 30.0);

const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub temperature: f64,
    pub humidity: f64,
}

impl Display for Measurement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "temperature: {} °C, humidity: {} %",
            self.temperature, self.humidity
        )
    }
}

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Sensor did not respond")]
    NoResponse,
}

pub trait Sensor: Send {
    fn measure(&mut self) -> Result<Measurement, SensorError>;
}

/// Room temperature and humidity drifting at random around their start
/// values.
#[derive(Debug)]
pub struct SimulatedSensor {
    rng: StdRng,
    temperature: f64,
    humidity: f64,
}

impl SimulatedSensor {
    pub fn new(temperature: f64, humidity: f64) -> SimulatedSensor {
        Self::with_rng(StdRng::from_entropy(), temperature, humidity)
    }

    pub fn seeded(seed: u64, temperature: f64, humidity: f64) -> SimulatedSensor {
        Self::with_rng(StdRng::seed_from_u64(seed), temperature, humidity)
    }

    fn with_rng(rng: StdRng, temperature: f64, humidity: f64) -> SimulatedSensor {
        SimulatedSensor {
            rng,
            temperature: clamp(temperature, TEMPERATURE_RANGE),
            humidity: clamp(humidity, HUMIDITY_RANGE),
        }
    }
}

impl Sensor for SimulatedSensor {
    fn measure(&mut self) -> Result<Measurement, SensorError> {
        self.temperature = clamp(
            self.temperature + self.rng.gen_range(-0.5..=0.5),
            TEMPERATURE_RANGE,
        );
        self.humidity = clamp(
            self.humidity + self.rng.gen_range(-2.0..=2.0),
            HUMIDITY_RANGE,
        );
        Ok(Measurement {
            temperature: round_tenth(self.temperature),
            humidity: round_tenth(self.humidity),
        })
    }
}

fn clamp(value: f64, (min, max): (f64, f64)) -> f64 {
    value.max(min).min(max)
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
