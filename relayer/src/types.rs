use payroll_types::{Address, CorrelationId};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Expected prefix of the gateway's (uncompressed) public key.
const KEY_PREFIX: &str = "0x04";

/// Minimum length of a well-formed public key in its hex form.
const KEY_MIN_LEN: usize = 66;

/// What the gateway needs to locate a decryption result.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub correlation: CorrelationId,
    pub context: PollContext,
}

/// The contract and chain a correlation id belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollContext {
    pub contract: Address,
    pub chain_id: u64,
}

/// JSON body of a public decryption query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryBody {
    pub(crate) handle: String,
    pub(crate) contract_address: Address,
    pub(crate) chain_id: u64,
}

impl From<&Query> for QueryBody {
    fn from(q: &Query) -> Self {
        Self {
            handle: q.correlation.handle(),
            contract_address: q.context.contract,
            chain_id: q.context.chain_id,
        }
    }
}

/// Gateway answer to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryReply {
    /// The result is available.
    Ready(serde_json::Value),
    /// The gateway does not know the result (yet).
    NotReady,
    /// Any other non-success status.
    Unexpected(StatusCode),
}

/// Does `key` look like the hex-encoded public key a healthy gateway serves?
pub fn is_public_key(key: &str) -> bool {
    let key = key.trim();
    key.len() >= KEY_MIN_LEN
        && key.starts_with(KEY_PREFIX)
        && key[2..].bytes().all(|b| b.is_ascii_hexdigit())
}
