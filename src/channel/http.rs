use async_trait::async_trait;
use reqwest::{Client, Response};
use url::Url;

use crate::channel::types::{Feed, Field, Update};
use crate::channel::{ChannelError, ChannelStore, Result};
use crate::config::ChannelConfig;

/// Body the channel sends back instead of json when the key or channel id
/// is wrong, or the channel has no entries yet.
const INVALID_MARKER: &str = "-1";

/// ThingSpeak channel reached over its REST api.
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: Client,
    config: ChannelConfig,
}

impl HttpChannel {
    pub fn new(config: ChannelConfig) -> Result<HttpChannel> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(HttpChannel { client, config })
    }

    fn read_url(&self, path: &str) -> Result<Url> {
        let mut url = self
            .config
            .base_url
            .join(&format!("channels/{}/{}", self.config.channel_id, path))?;
        url.query_pairs_mut()
            .append_pair("api_key", self.config.read_key.expose());
        Ok(url)
    }

    fn field_url(&self, field: Field) -> Result<Url> {
        self.read_url(&format!("fields/{}/last.json", field.number()))
    }

    fn feed_url(&self) -> Result<Url> {
        self.read_url("feeds/last.json")
    }

    fn update_url(&self) -> Result<Url> {
        Ok(self.config.base_url.join("update")?)
    }

    async fn get_feed(&self, url: Url) -> Result<Feed> {
        // query carries the read key, keep it out of the logs
        debug!("GET {}", url.path());
        let response = self.client.get(url).send().await?;
        let body = check_status(response)?.text().await?;
        trace!("response body: {}", body);
        parse_feed(&body)
    }
}

#[async_trait]
impl ChannelStore for HttpChannel {
    async fn last_field(&self, field: Field) -> Result<Feed> {
        let url = self.field_url(field)?;
        self.get_feed(url).await
    }

    async fn last_feed(&self) -> Result<Feed> {
        let url = self.feed_url()?;
        self.get_feed(url).await
    }

    async fn update(&self, update: &Update) -> Result<u64> {
        if update.is_empty() {
            return Err(ChannelError::EmptyUpdate);
        }
        let url = self.update_url()?;
        debug!("POST {} {}", url.path(), update);
        let response = self
            .client
            .post(url)
            .json(&update.to_body(&self.config.write_key))
            .send()
            .await?;
        let body = check_status(response)?.text().await?;
        parse_entry_id(&body)
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ChannelError::Status(status))
    }
}

fn parse_feed(body: &str) -> Result<Feed> {
    if body.trim() == INVALID_MARKER {
        return Err(ChannelError::Unauthorized);
    }
    Ok(serde_json::from_str(body)?)
}

fn parse_entry_id(body: &str) -> Result<u64> {
    let body = body.trim();
    if body == INVALID_MARKER {
        return Err(ChannelError::Unauthorized);
    }
    match body.parse::<u64>() {
        // the channel answers 0 when it drops the update, e.g. when rate limited
        Ok(0) => Err(ChannelError::Rejected),
        Ok(id) => Ok(id),
        Err(_) => Err(ChannelError::EntryId(body.to_string())),
    }
}
