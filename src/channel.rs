use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use crate::channel::http::HttpChannel;
pub use crate::channel::types::{Feed, Field, FieldValue, InvalidField, Update};

mod http;
mod types;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Could not reach channel: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Channel responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error("Channel rejected the api key or channel id")]
    Unauthorized,
    #[error("Channel rejected the update")]
    Rejected,
    #[error("Could not decode channel response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Could not parse entry id from {0:?}")]
    EntryId(String),
    #[error("Invalid value {raw:?} in {field}")]
    InvalidValue { field: Field, raw: String },
    #[error("{0} missing from channel response")]
    MissingField(Field),
    #[error("Could not build channel url: {0}")]
    Url(#[from] url::ParseError),
    #[error("Update has no fields")]
    EmptyUpdate,
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Remote store holding the numbered fields of one channel.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Latest entry as seen through a single field. Only `field` is populated.
    async fn last_field(&self, field: Field) -> Result<Feed>;
    /// Latest entry with every field it carries.
    async fn last_feed(&self) -> Result<Feed>;
    /// Writes a new entry and returns its id.
    async fn update(&self, update: &Update) -> Result<u64>;
}

#[async_trait]
impl<T: ChannelStore + ?Sized> ChannelStore for Arc<T> {
    async fn last_field(&self, field: Field) -> Result<Feed> {
        (**self).last_field(field).await
    }

    async fn last_feed(&self) -> Result<Feed> {
        (**self).last_feed().await
    }

    async fn update(&self, update: &Update) -> Result<u64> {
        (**self).update(update).await
    }
}
