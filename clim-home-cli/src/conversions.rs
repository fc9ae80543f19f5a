use std::convert::TryFrom;
use std::time::Duration;

use clim_home::config::{
    ApiKey, ChannelConfig, ClimateConfig, ConfigError, FieldMap, TargetBounds,
};

use crate::{ChannelOpt, ClimateOpt, FieldOpt};

impl TryFrom<ChannelOpt> for ChannelConfig {
    type Error = ConfigError;

    fn try_from(
        ChannelOpt {
            channel_id,
            read_key,
            write_key,
            base_url,
            timeout,
        }: ChannelOpt,
    ) -> Result<Self, Self::Error> {
        Ok(
            ChannelConfig::new(channel_id, ApiKey::new(read_key), ApiKey::new(write_key))?
                .with_base_url(&base_url)?
                .with_request_timeout(Duration::from_secs(timeout)),
        )
    }
}

impl From<FieldOpt> for FieldMap {
    fn from(
        FieldOpt {
            temperature_field,
            humidity_field,
            status_field,
            target_field,
        }: FieldOpt,
    ) -> Self {
        FieldMap {
            temperature: temperature_field,
            humidity: humidity_field,
            unit_status: status_field,
            target_temperature: target_field,
        }
    }
}

impl TryFrom<ClimateOpt> for ClimateConfig {
    type Error = ConfigError;

    fn try_from(
        ClimateOpt {
            fields,
            read_mode,
            min_target,
            max_target,
        }: ClimateOpt,
    ) -> Result<Self, Self::Error> {
        let bounds = match (min_target, max_target) {
            (None, None) => None,
            (min, max) => Some(TargetBounds::new(
                min.unwrap_or(i32::MIN),
                max.unwrap_or(i32::MAX),
            )?),
        };
        let config = ClimateConfig {
            fields: fields.into(),
            read_mode,
            bounds,
        };
        config.validate()?;
        Ok(config)
    }
}
