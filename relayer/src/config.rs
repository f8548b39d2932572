use std::time::Duration;

use bon::Builder;
use url::{ParseError, Url};

pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Log label.
    #[builder(into, default = String::from("gateway"))]
    pub(crate) label: String,

    /// Gateway base URL.
    ///
    /// The liveness endpoint `public_key` is resolved against it, so it should
    /// end with a `/` if it has a path.
    #[builder(with = |s: &str| -> Result<_, ParseError> { Url::parse(s) })]
    pub(crate) base_url: Url,

    /// Public decryption endpoint.
    #[builder(with = |s: &str| -> Result<_, ParseError> { Url::parse(s) })]
    pub(crate) decrypt_url: Url,

    /// Upper bound of a liveness probe.
    #[builder(default = Duration::from_secs(5))]
    pub(crate) probe_timeout: Duration,

    /// Upper bound of any other request.
    #[builder(default = Duration::from_secs(30))]
    pub(crate) request_timeout: Duration,

    /// Connect only with https?
    #[builder(default = false)]
    pub(crate) https_only: bool,
}

impl Config {
    /// The public Sepolia gateway.
    pub fn sepolia() -> Result<Self, ParseError> {
        Ok(Self::builder()
            .label("sepolia")
            .base_url("https://gateway.sepolia.zama.ai/")?
            .decrypt_url("https://gateway.sepolia.zama.ai/v1/public-decrypt")?
            .https_only(true)
            .build())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn decrypt_url(&self) -> &Url {
        &self.decrypt_url
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Config;

    #[test]
    fn sepolia_defaults() {
        let c = Config::sepolia().unwrap();
        assert_eq!(c.probe_timeout, Duration::from_secs(5));
        assert_eq!(
            c.base_url().join("public_key").unwrap().as_str(),
            "https://gateway.sepolia.zama.ai/public_key"
        );
        assert_eq!(c.decrypt_url().path(), "/v1/public-decrypt");
    }
}
