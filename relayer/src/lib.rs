mod config;
mod monitor;
mod poller;
mod types;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json as json;
use tracing::{debug, warn};

use crate::types::QueryBody;

pub use config::{Config, ConfigBuilder, SEPOLIA_CHAIN_ID};
pub use monitor::{HealthMonitor, MonitorHandle};
pub use poller::{PollError, PollOptions, PollOptionsBuilder, PollOutcome, PollProgress, Poller};
pub use types::{PollContext, Query, QueryReply, is_public_key};

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// The request/response surface of the decryption gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Is the gateway reachable and serving a well-formed public key?
    ///
    /// Never fails; every error counts as "down".
    async fn probe(&self) -> bool;

    /// Ask for the result of a decryption request.
    async fn query(&self, q: &Query) -> Result<QueryReply, Error>;
}

/// A client for the decryption gateway.
#[derive(Debug, Clone)]
pub struct Client {
    config: Config,
    client: reqwest::Client,
}

impl Client {
    pub fn new(c: Config) -> Result<Self, Error> {
        let r = reqwest::Client::builder()
            .https_only(c.https_only)
            .timeout(c.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            config: c,
            client: r,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch the gateway's public key.
    pub async fn public_key(&self) -> Result<String, Error> {
        let u = self.config.base_url.join("public_key")?;
        let res = self
            .client
            .get(u)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .timeout(self.config.probe_timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Error::Status(res.status()));
        }
        Ok(res.text().await?)
    }

    async fn post(&self, u: Url, body: &QueryBody) -> Result<QueryReply, Error> {
        let res = self.client.post(u).json(body).send().await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(QueryReply::NotReady);
        }
        if !status.is_success() {
            return Ok(QueryReply::Unexpected(status));
        }
        let bytes = res.bytes().await?;
        Ok(QueryReply::Ready(json::from_slice(&bytes)?))
    }
}

#[async_trait]
impl Gateway for Client {
    async fn probe(&self) -> bool {
        match self.public_key().await {
            Ok(key) if is_public_key(&key) => {
                debug!(gateway = %self.config.label, "gateway is up");
                true
            }
            Ok(key) => {
                let prefix: String = key.chars().take(20).collect();
                warn!(gateway = %self.config.label, %prefix, "malformed gateway public key");
                false
            }
            Err(err) => {
                warn!(gateway = %self.config.label, %err, "gateway unavailable");
                false
            }
        }
    }

    async fn query(&self, q: &Query) -> Result<QueryReply, Error> {
        self.post(self.config.decrypt_url.clone(), &QueryBody::from(q))
            .await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("json error: {0}")]
    Json(#[from] json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("api status: {0}")]
    Status(StatusCode),
}
