mod chain;
mod gateway;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use chain::{ChainConfig, ChainConfigBuilder};
pub use gateway::{GatewayConfig, GatewayConfigBuilder};

#[derive(Debug, thiserror::Error)]
#[error("config error {0}: {1}")]
pub struct ConfigError(PathBuf, #[source] Box<dyn std::error::Error + Send + Sync>);

/// Configuration of the payroll client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PayrollConfig {
    pub chain: ChainConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
}

impl PayrollConfig {
    pub async fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_toml(path).await
    }
}

/// Gateway polling of one decryption request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval_ms: 5000,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Waiting for the on-chain callback of one decryption request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CallbackConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            interval_ms: 2000,
        }
    }
}

impl CallbackConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

pub(crate) async fn read_toml<T, P>(path: P) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let s = tokio::fs::read_to_string(path.as_ref())
        .await
        .map_err(|e| ConfigError(path.as_ref().into(), Box::new(e)))?;
    toml::from_str(&s).map_err(|e| ConfigError(path.as_ref().into(), Box::new(e)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::Address;

    use super::{CallbackConfig, PayrollConfig, PollConfig};

    const CONFIG: &str = r#"
        [chain]
        id = 11155111
        rpc-url = "https://eth-sepolia.public.blastapi.io"
        confidential-contract = "0x1111111111111111111111111111111111111111"
        fallback-contract = "0x2222222222222222222222222222222222222222"

        [gateway]
        base-url = "https://gateway.sepolia.zama.ai/"
        decrypt-url = "https://gateway.sepolia.zama.ai/v1/public-decrypt"

        [poll]
        interval-ms = 1000
    "#;

    #[test]
    fn missing_sections_use_defaults() {
        let c: PayrollConfig = toml::from_str(CONFIG).unwrap();
        assert_eq!(c.chain.id, 11155111);
        assert_eq!(c.chain.fallback_contract, Address::repeat_byte(0x22));
        assert_eq!(c.gateway.health_check_interval(), Duration::from_secs(60));
        assert_eq!(c.gateway.probe_timeout(), Duration::from_secs(5));
        assert_eq!(
            c.poll,
            PollConfig {
                max_attempts: 60,
                interval_ms: 1000
            }
        );
        assert_eq!(c.callback, CallbackConfig::default());
        assert_eq!(c.callback.interval(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn read_reports_path() {
        let path = std::env::temp_dir().join(format!("payroll-{}.toml", std::process::id()));
        tokio::fs::write(&path, CONFIG).await.unwrap();
        let c = PayrollConfig::read(&path).await.unwrap();
        assert_eq!(c.chain.confidential_contract, Address::repeat_byte(0x11));

        tokio::fs::write(&path, "[chain]\nid = \"sepolia\"").await.unwrap();
        let err = PayrollConfig::read(&path).await.unwrap_err();
        assert!(err.to_string().contains(&*path.to_string_lossy()));
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
