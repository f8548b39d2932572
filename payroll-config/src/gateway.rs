use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
    pub base_url: Url,
    pub decrypt_url: Url,

    #[serde(default = "default_health_check_interval")]
    #[builder(default = default_health_check_interval())]
    pub health_check_interval_ms: u64,

    #[serde(default = "default_probe_timeout")]
    #[builder(default = default_probe_timeout())]
    pub probe_timeout_ms: u64,
}

impl GatewayConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn default_health_check_interval() -> u64 {
    60_000
}

fn default_probe_timeout() -> u64 {
    5_000
}
