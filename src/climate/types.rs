use std::fmt::{Display, Formatter};

use strum_macros::{Display, EnumString};

use crate::channel::{ChannelError, Feed, Field, FieldValue};
use crate::config::FieldMap;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum UnitStatus {
    Off,
    On,
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::Off
    }
}

impl UnitStatus {
    pub fn toggled(self) -> UnitStatus {
        match self {
            UnitStatus::Off => UnitStatus::On,
            UnitStatus::On => UnitStatus::Off,
        }
    }

    pub fn is_on(self) -> bool {
        self == UnitStatus::On
    }

    /// Only a value of exactly 1 means on. Missing, null, garbage and any
    /// other number all read as off.
    pub fn from_value(value: Option<&FieldValue>) -> UnitStatus {
        match value.and_then(FieldValue::as_f64) {
            Some(v) if v == 1.0 => UnitStatus::On,
            Some(v) if v == 0.0 => UnitStatus::Off,
            _ => {
                debug!("treating unit status {:?} as off", value);
                UnitStatus::Off
            }
        }
    }
}

impl From<UnitStatus> for u8 {
    fn from(status: UnitStatus) -> Self {
        match status {
            UnitStatus::Off => 0,
            UnitStatus::On => 1,
        }
    }
}

/// Local copy of the four values tracked on the channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClimateState {
    pub current_temperature: Option<f64>,
    pub current_humidity: Option<f64>,
    pub target_temperature: i32,
    pub unit_status: UnitStatus,
}

impl ClimateState {
    pub fn from_feed(feed: &Feed, fields: &FieldMap) -> Result<ClimateState, ChannelError> {
        Ok(ClimateState {
            current_temperature: decode_reading(feed, fields.temperature)?,
            current_humidity: decode_reading(feed, fields.humidity)?,
            target_temperature: decode_target(feed, fields.target_temperature)?,
            unit_status: UnitStatus::from_value(feed.get(fields.unit_status)),
        })
    }
}

fn decode_reading(feed: &Feed, field: Field) -> Result<Option<f64>, ChannelError> {
    feed.get(field)
        .map(|value| {
            value.as_f64().ok_or_else(|| ChannelError::InvalidValue {
                field,
                raw: value.as_str().to_string(),
            })
        })
        .transpose()
}

pub(crate) fn decode_target(feed: &Feed, field: Field) -> Result<i32, ChannelError> {
    let value = feed.get(field).ok_or(ChannelError::MissingField(field))?;
    value
        .as_f64()
        .filter(|v| v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64)
        .map(|v| v as i32)
        .ok_or_else(|| ChannelError::InvalidValue {
            field,
            raw: value.as_str().to_string(),
        })
}

impl Display for ClimateState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.current_temperature {
            Some(t) => write!(f, "temperature: {} °C, ", t)?,
            None => write!(f, "temperature: unknown, ")?,
        }
        match self.current_humidity {
            Some(h) => write!(f, "humidity: {} %, ", h)?,
            None => write!(f, "humidity: unknown, ")?,
        }
        write!(
            f,
            "target: {} °C, unit: {}",
            self.target_temperature, self.unit_status
        )
    }
}
