use std::time::Duration;

use bon::Builder;
use relayer::{PollOptions, SEPOLIA_CHAIN_ID};

#[derive(Debug, Clone, Builder)]
pub struct CoordinatorConfig {
    /// Gateway polling.
    #[builder(default)]
    pub(crate) poll: PollOptions,

    /// Number of ledger reads while waiting for the callback.
    #[builder(default = 120)]
    pub(crate) callback_max_attempts: u32,

    /// Pause between two ledger reads.
    #[builder(default = Duration::from_secs(2))]
    pub(crate) callback_interval: Duration,

    /// Chain the gateway resolves correlation ids on.
    #[builder(default = SEPOLIA_CHAIN_ID)]
    pub(crate) chain_id: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CoordinatorConfig {
    pub fn poll(&self) -> &PollOptions {
        &self.poll
    }

    pub fn callback_max_attempts(&self) -> u32 {
        self.callback_max_attempts
    }

    pub fn callback_interval(&self) -> Duration {
        self.callback_interval
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}
