//! Device side of the channel: applies the status and target written by
//! clients to the unit, and reports room readings back.

use thiserror::Error;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::channel::{ChannelError, ChannelStore, Update};
use crate::climate::{decode_target, UnitStatus};
use crate::config::{ConfigError, FieldMap};

pub use crate::unit::relay::{LoggingRelay, Relay};
pub use crate::unit::sensor::{Measurement, Sensor, SensorError, SimulatedSensor, TEMPERATURE_RANGE};

mod relay;
mod sensor;

const CONTROL_RATE: Duration = Duration::from_secs(1);
const REPORT_RATE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum UnitError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

pub type Result<T> = std::result::Result<T, UnitError>;

#[derive(Clone, Debug)]
pub struct UnitConfig {
    pub fields: FieldMap,
    /// How often status and target are read
    pub control_rate: Duration,
    /// How often readings are written
    pub report_rate: Duration,
}

impl Default for UnitConfig {
    fn default() -> Self {
        UnitConfig {
            fields: FieldMap::default(),
            control_rate: CONTROL_RATE,
            report_rate: REPORT_RATE,
        }
    }
}

/// What one control step did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    pub status: Option<UnitStatus>,
    pub target: Option<i32>,
    pub reported: Option<Measurement>,
}

pub struct UnitBridge<S, T, R> {
    store: S,
    config: UnitConfig,
    sensor: T,
    relay: R,
    target: Option<i32>,
    last_report: Instant,
}

impl<S, T, R> UnitBridge<S, T, R>
where
    S: ChannelStore,
    T: Sensor,
    R: Relay,
{
    /// The relay starts off whatever the channel says.
    pub fn new(
        store: S,
        config: UnitConfig,
        sensor: T,
        mut relay: R,
    ) -> std::result::Result<UnitBridge<S, T, R>, ConfigError> {
        config.fields.validate()?;
        relay.off();
        Ok(UnitBridge {
            store,
            config,
            sensor,
            relay,
            target: None,
            last_report: Instant::now(),
        })
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// Latest target temperature received from the channel.
    pub fn target(&self) -> Option<i32> {
        self.target
    }

    async fn read_status(&self) -> Result<UnitStatus> {
        let field = self.config.fields.unit_status;
        let feed = self.store.last_field(field).await?;
        let value = feed.get(field).ok_or(ChannelError::MissingField(field))?;
        match value.as_f64() {
            Some(v) if v == 1.0 => Ok(UnitStatus::On),
            Some(v) if v == 0.0 => Ok(UnitStatus::Off),
            _ => Err(ChannelError::InvalidValue {
                field,
                raw: value.as_str().to_string(),
            }
            .into()),
        }
    }

    async fn read_target(&self) -> Result<i32> {
        let field = self.config.fields.target_temperature;
        let feed = self.store.last_field(field).await?;
        Ok(decode_target(&feed, field)?)
    }

    async fn report(&mut self) -> Result<Measurement> {
        let measurement = self.sensor.measure()?;
        let update = Update::new()
            .set_float(self.config.fields.temperature, measurement.temperature)
            .set_float(self.config.fields.humidity, measurement.humidity);
        let entry = self.store.update(&update).await?;
        debug!("reported {} as entry {}", measurement, entry);
        Ok(measurement)
    }

    /// One control step: follow the channel's status and target, then send
    /// readings if a report is due. Failures are logged and skipped.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        match self.read_target().await {
            Ok(target) => {
                if self.target != Some(target) {
                    info!("target temperature received: {} °C", target);
                }
                self.target = Some(target);
                report.target = Some(target);
            }
            Err(e) => warn!("could not read target temperature: {}", e),
        }

        match self.read_status().await {
            Ok(status) => {
                self.relay.apply(status);
                report.status = Some(status);
            }
            Err(e) => warn!("could not read unit status: {}", e),
        }

        if self.last_report.elapsed() >= self.config.report_rate {
            match self.report().await {
                Ok(measurement) => report.reported = Some(measurement),
                Err(e) => error!("could not report readings: {}", e),
            }
            self.last_report = Instant::now();
        }

        report
    }

    /// Ticks on the control rate until `stop` turns true or its sender is
    /// dropped.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.control_rate);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    trace!("unit tick: {:?}", report);
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        info!("unit bridge stopping");
                        break;
                    }
                }
            }
        }
    }
}
