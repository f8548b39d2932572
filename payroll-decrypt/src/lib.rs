//! The decryption request lifecycle.
//!
//! A request goes `Idle -> Requesting -> Polling -> AwaitingCallback` and ends
//! in `Succeeded` or `Failed`. The request transaction is sent to the ledger,
//! the correlation id is taken from its receipt, the gateway is polled until it
//! has the result and finally the ledger is read until the gateway callback has
//! stored the decrypted value.

mod config;
mod coordinator;
mod error;
mod metrics;

pub use config::{CoordinatorConfig, CoordinatorConfigBuilder};
pub use coordinator::{Coordinator, Event};
pub use error::DecryptError;
pub use metrics::DecryptMetrics;
