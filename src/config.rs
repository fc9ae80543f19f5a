use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

use strum_macros::{Display, EnumString};
use thiserror::Error;
use url::Url;

use crate::channel::Field;

pub const DEFAULT_BASE_URL: &str = "https://api.thingspeak.com/";

const DEFAULT_POLL_RATE: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Field {0} is mapped to more than one value")]
    DuplicateField(Field),
    #[error("Target bounds are inverted ({min} > {max})")]
    InvertedBounds { min: i32, max: i32 },
    #[error("Invalid base url {0}")]
    BaseUrl(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A channel api key. Never shows up in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(key: S) -> ApiKey {
        ApiKey(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for ApiKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey(***)")
    }
}

/// Which numbered channel field holds which value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldMap {
    pub temperature: Field,
    pub humidity: Field,
    pub unit_status: Field,
    pub target_temperature: Field,
}

impl Default for FieldMap {
    fn default() -> Self {
        FieldMap {
            temperature: Field::Field1,
            humidity: Field::Field2,
            unit_status: Field::Field3,
            target_temperature: Field::Field4,
        }
    }
}

impl FieldMap {
    pub fn all(&self) -> [Field; 4] {
        [
            self.temperature,
            self.humidity,
            self.unit_status,
            self.target_temperature,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let fields = self.all();
        for (i, field) in fields.iter().enumerate() {
            if fields[i + 1..].contains(field) {
                return Err(ConfigError::DuplicateField(*field));
            }
        }
        Ok(())
    }
}

/// How a refresh fetches the four tracked fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ReadMode {
    /// One `fields/<n>/last.json` request per field
    PerField,
    /// A single `feeds/last.json` request
    LastFeed,
}

impl Default for ReadMode {
    fn default() -> Self {
        ReadMode::PerField
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollSchedule {
    Once,
    Every(Duration),
}

impl Default for PollSchedule {
    fn default() -> Self {
        PollSchedule::Every(DEFAULT_POLL_RATE)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetBounds {
    pub min: i32,
    pub max: i32,
}

impl TargetBounds {
    pub fn new(min: i32, max: i32) -> Result<TargetBounds> {
        if min > max {
            return Err(ConfigError::InvertedBounds { min, max });
        }
        Ok(TargetBounds { min, max })
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Display for TargetBounds {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub base_url: Url,
    pub channel_id: u64,
    pub read_key: ApiKey,
    pub write_key: ApiKey,
    pub request_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(channel_id: u64, read_key: ApiKey, write_key: ApiKey) -> Result<ChannelConfig> {
        Ok(ChannelConfig {
            base_url: parse_base_url(DEFAULT_BASE_URL)?,
            channel_id,
            read_key,
            write_key,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<ChannelConfig> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> ChannelConfig {
        self.request_timeout = timeout;
        self
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).map_err(|_| ConfigError::BaseUrl(base_url.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::BaseUrl(base_url.to_string()));
    }
    // joins drop the last path segment unless it ends with a slash
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Clone, Debug, Default)]
pub struct ClimateConfig {
    pub fields: FieldMap,
    pub read_mode: ReadMode,
    pub bounds: Option<TargetBounds>,
}

impl ClimateConfig {
    pub fn validate(&self) -> Result<()> {
        self.fields.validate()?;
        match self.bounds {
            Some(TargetBounds { min, max }) if min > max => {
                Err(ConfigError::InvertedBounds { min, max })
            }
            _ => Ok(()),
        }
    }
}
