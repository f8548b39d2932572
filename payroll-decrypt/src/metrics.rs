use prometheus::{
    IntCounter, IntCounterVec, IntGauge, Registry, Result, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry,
};

#[derive(Debug)]
#[non_exhaustive]
pub struct DecryptMetrics {
    /// Decryption requests started, retries excluded.
    pub started: IntCounter,
    /// Retries started.
    pub retries: IntCounter,
    pub succeeded: IntCounter,
    /// Failed attempts by failure kind.
    pub failed: IntCounterVec,
    /// Gateway queries sent.
    pub poll_attempts: IntCounter,
    /// Requests between start and their terminal state.
    pub in_flight: IntGauge,
}

impl DecryptMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            started: register_int_counter_with_registry!(
                "decrypt_requests_total",
                "number of decryption requests",
                registry
            )?,
            retries: register_int_counter_with_registry!(
                "decrypt_retries_total",
                "number of decryption retries",
                registry
            )?,
            succeeded: register_int_counter_with_registry!(
                "decrypt_succeeded_total",
                "number of successful decryptions",
                registry
            )?,
            failed: register_int_counter_vec_with_registry!(
                "decrypt_failed_total",
                "number of failed decryption attempts",
                &["kind"],
                registry
            )?,
            poll_attempts: register_int_counter_with_registry!(
                "decrypt_gateway_queries_total",
                "number of gateway queries",
                registry
            )?,
            in_flight: register_int_gauge_with_registry!(
                "decrypt_in_flight",
                "decryption requests in flight",
                registry
            )?,
        })
    }
}
