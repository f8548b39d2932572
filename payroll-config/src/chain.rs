use alloy_primitives::Address;
use bon::Builder;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    pub id: u64,
    pub rpc_url: Url,
    /// Payroll contract holding encrypted salaries.
    pub confidential_contract: Address,
    /// Payroll contract holding plain salaries.
    pub fallback_contract: Address,
}
