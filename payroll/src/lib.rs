//! Confidential payroll client.
//!
//! Wires the gateway health monitor, the mode selector and the decryption
//! coordinator together. While the gateway is reachable the client works in
//! privacy mode against the confidential contract, otherwise it falls back to
//! the contract holding plain values.

mod mode;

use std::sync::Arc;
use std::time::{Duration, Instant};

use payroll_config::{GatewayConfig, PayrollConfig};
use payroll_contract::provider::HttpProviderWithWallet;
use payroll_contract::{ContractLedger, Ledger};
use payroll_decrypt::{Coordinator, CoordinatorConfig, DecryptError};
use payroll_types::{Decrypted, Mode, ModeSelection, SubjectId};
use prometheus::{Encoder, Registry, TextEncoder};
use relayer::{Client, Gateway, HealthMonitor, MonitorHandle, PollOptions};
use tracing::{debug, info};

pub use mode::{Contracts, ModeSelector};

/// A [`Context`] talking to a real chain and gateway.
pub type ChainContext = Context<ContractLedger<HttpProviderWithWallet>, Client>;

pub struct Context<L, G> {
    monitor: HealthMonitor<G>,
    selector: ModeSelector,
    coordinator: Coordinator<L, G>,
    registry: Registry,
    monitoring: Option<MonitorHandle>,
    /// Age after which the gateway state is probed again before use.
    max_age: Duration,
}

impl<L: Ledger + 'static, G: Gateway + 'static> Context<L, G> {
    /// Decryption goes to the ledger's contract, `fallback` is used while
    /// the gateway is unreachable.
    pub fn new(
        ledger: Arc<L>,
        gateway: Arc<G>,
        fallback: alloy::primitives::Address,
        config: CoordinatorConfig,
    ) -> Result<Self, Error> {
        let registry = Registry::new();
        let contracts = Contracts {
            confidential: ledger.address(),
            fallback,
        };
        let monitor = HealthMonitor::new(gateway.clone());
        let selector = ModeSelector::new(monitor.subscribe(), contracts);
        let coordinator = Coordinator::new(ledger, gateway, config, &registry)?;
        Ok(Self {
            monitor,
            selector,
            coordinator,
            registry,
            monitoring: None,
            max_age: Duration::ZERO,
        })
    }

    /// Probe the gateway, select the mode and keep both up to date.
    ///
    /// Calling it again restarts monitoring with the new `period`.
    pub async fn start(&mut self, period: Duration) -> ModeSelection {
        self.stop();
        let up = self.monitor.refresh().await;
        self.selector.reconcile();
        let selector = self.selector.clone();
        let handle = self.monitor.start_monitoring(
            move |_| {
                selector.reconcile();
            },
            period,
        );
        self.monitoring = Some(handle);
        self.max_age = period.saturating_mul(2);
        let s = self.selector.selection();
        info!(gateway_up = up, mode = %s.mode, auto = s.is_auto, "payroll client started");
        s
    }

    pub fn stop(&mut self) {
        if let Some(h) = self.monitoring.take() {
            h.cancel()
        }
    }

    /// Is the last gateway probe missing or older than two monitoring
    /// periods? Without monitoring every result counts as stale.
    pub fn is_gateway_stale(&self) -> bool {
        !self.is_monitoring() || self.monitor.state().is_stale(Instant::now(), self.max_age)
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.as_ref().is_some_and(|h| !h.is_cancelled())
    }

    pub fn monitor(&self) -> &HealthMonitor<G> {
        &self.monitor
    }

    pub fn selector(&self) -> &ModeSelector {
        &self.selector
    }

    pub fn coordinator(&self) -> &Coordinator<L, G> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decrypt the value of `subject`.
    ///
    /// Requires privacy mode, judged by a fresh gateway state.
    pub async fn decrypt(&self, subject: SubjectId) -> Result<Decrypted, Error> {
        self.ensure_privacy().await?;
        Ok(self.coordinator.request_decryption(subject).await?)
    }

    /// Retry the failed decryption of `subject`. Requires privacy mode.
    pub async fn retry(&self, subject: SubjectId) -> Result<Decrypted, Error> {
        self.ensure_privacy().await?;
        Ok(self.coordinator.retry_request(subject).await?)
    }

    /// All metrics in the prometheus text format.
    pub fn export_metrics(&self) -> Result<String, Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn ensure_privacy(&self) -> Result<(), Error> {
        if self.is_gateway_stale() {
            debug!("gateway state is stale, checking again");
            self.monitor.refresh().await;
            self.selector.reconcile();
        }
        match self.selector.mode() {
            Mode::Privacy => Ok(()),
            m => Err(Error::NotInPrivacyMode(m)),
        }
    }
}

impl ChainContext {
    pub fn from_config(cfg: &PayrollConfig, provider: HttpProviderWithWallet) -> Result<Self, Error> {
        let ledger = ContractLedger::new(provider, cfg.chain.confidential_contract);
        let gateway = gateway_client(&cfg.gateway, cfg.chain.id)?;
        Self::new(
            Arc::new(ledger),
            Arc::new(gateway),
            cfg.chain.fallback_contract,
            coordinator_config(cfg),
        )
    }
}

/// Gateway client for the given chain.
pub fn gateway_client(cfg: &GatewayConfig, chain_id: u64) -> Result<Client, Error> {
    let c = relayer::Config::builder()
        .label(format!("gateway-{chain_id}"))
        .base_url(cfg.base_url.as_str())?
        .decrypt_url(cfg.decrypt_url.as_str())?
        .probe_timeout(cfg.probe_timeout())
        .build();
    Ok(Client::new(c)?)
}

pub fn coordinator_config(cfg: &PayrollConfig) -> CoordinatorConfig {
    let poll = PollOptions::builder()
        .max_attempts(cfg.poll.max_attempts)
        .interval(cfg.poll.interval())
        .build();
    CoordinatorConfig::builder()
        .poll(poll)
        .callback_max_attempts(cfg.callback.max_attempts)
        .callback_interval(cfg.callback.interval())
        .chain_id(cfg.chain.id)
        .build()
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("decryption needs privacy mode, current mode is {0}")]
    NotInPrivacyMode(Mode),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error("gateway error: {0}")]
    Gateway(#[from] relayer::Error),

    #[error("invalid gateway url: {0}")]
    Url(#[from] url::ParseError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use alloy::primitives::Address;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use payroll_config::PayrollConfig;
    use payroll_contract::{DecryptionState, Ledger, LedgerCall, LedgerError, Receipt};
    use payroll_decrypt::CoordinatorConfig;
    use payroll_types::{Mode, SubjectId, TxHash};
    use relayer::{Gateway, Query, QueryReply};
    use tokio::time::sleep;

    use super::{Context, Error, coordinator_config};

    /// Counts submissions and rejects all of them.
    #[derive(Default)]
    struct Unreachable {
        submits: AtomicUsize,
    }

    #[async_trait]
    impl Ledger for Unreachable {
        fn address(&self) -> Address {
            Address::repeat_byte(0xaa)
        }

        async fn submit(&self, _: LedgerCall) -> Result<TxHash, LedgerError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Rpc("unreachable".into()))
        }

        async fn confirm(&self, tx: TxHash) -> Result<Receipt, LedgerError> {
            Err(LedgerError::Reverted(tx))
        }

        async fn decryption_state(&self, _: &SubjectId) -> Result<DecryptionState, LedgerError> {
            Ok(DecryptionState::default())
        }

        async fn max_retries(&self) -> Result<u32, LedgerError> {
            Ok(3)
        }
    }

    /// Scripted probe results; the last one repeats.
    struct Probes(Mutex<VecDeque<bool>>);

    impl Probes {
        fn new<I: IntoIterator<Item = bool>>(results: I) -> Arc<Self> {
            Arc::new(Self(Mutex::new(results.into_iter().collect())))
        }
    }

    #[async_trait]
    impl Gateway for Probes {
        async fn probe(&self) -> bool {
            let mut q = self.0.lock();
            if q.len() > 1 {
                q.pop_front().unwrap_or_default()
            } else {
                q.front().copied().unwrap_or_default()
            }
        }

        async fn query(&self, _: &Query) -> Result<QueryReply, relayer::Error> {
            Ok(QueryReply::NotReady)
        }
    }

    fn context(probes: Arc<Probes>) -> (Arc<Unreachable>, Context<Unreachable, Probes>) {
        let ledger = Arc::new(Unreachable::default());
        let ctx = Context::new(
            ledger.clone(),
            probes,
            Address::repeat_byte(0xbb),
            CoordinatorConfig::default(),
        )
        .unwrap();
        (ledger, ctx)
    }

    fn subject() -> SubjectId {
        SubjectId::new(1, Address::repeat_byte(0x11))
    }

    #[tokio::test(start_paused = true)]
    async fn follows_the_gateway() {
        payroll_utils::logging::init_logging();
        let (ledger, mut ctx) = context(Probes::new([false, false, true]));

        let s = ctx.start(Duration::from_millis(10)).await;
        assert_eq!(s.mode, Mode::Fallback);
        assert!(s.is_auto);
        assert!(ctx.is_monitoring());
        assert_eq!(ctx.selector().active_contract(), Address::repeat_byte(0xbb));

        let err = ctx.decrypt(subject()).await.unwrap_err();
        assert!(matches!(err, Error::NotInPrivacyMode(Mode::Fallback)));
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 0);
        assert!(ctx.coordinator().status(&subject()).is_none());

        let mut modes = ctx.selector().subscribe();
        modes.wait_for(|s| s.mode == Mode::Privacy).await.unwrap();
        assert_eq!(ctx.selector().active_contract(), Address::repeat_byte(0xaa));

        ctx.stop();
        assert!(!ctx.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_survives_gateway_changes() {
        let (_, mut ctx) = context(Probes::new([true, false]));
        assert_eq!(ctx.start(Duration::from_millis(10)).await.mode, Mode::Privacy);

        ctx.selector().set_mode_manually(Mode::Privacy);
        sleep(Duration::from_millis(50)).await;
        assert!(!ctx.monitor().state().is_up());
        assert_eq!(ctx.selector().mode(), Mode::Privacy);

        ctx.selector().set_auto_mode(true);
        assert_eq!(ctx.selector().mode(), Mode::Fallback);
    }

    #[tokio::test]
    async fn rechecks_gateway_when_state_is_stale() {
        let (ledger, ctx) = context(Probes::new([true]));
        assert!(ctx.monitor().state().as_of.is_none());
        assert!(ctx.is_gateway_stale());
        assert_eq!(ctx.selector().mode(), Mode::Fallback);

        // not monitoring: the gateway is probed before the mode is judged
        let err = ctx.decrypt(subject()).await.unwrap_err();
        assert!(matches!(err, Error::Decrypt(_)), "{err}");
        assert!(ctx.monitor().state().is_up());
        assert_eq!(ctx.selector().mode(), Mode::Privacy);
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_state_while_monitoring() {
        let (_, mut ctx) = context(Probes::new([true]));
        ctx.start(Duration::from_secs(3600)).await;
        assert!(!ctx.is_gateway_stale());

        ctx.stop();
        assert!(ctx.is_gateway_stale());
    }

    #[tokio::test]
    async fn failures_show_up_in_metrics() {
        let (ledger, mut ctx) = context(Probes::new([true]));
        ctx.start(Duration::from_secs(3600)).await;

        let err = ctx.decrypt(subject()).await.unwrap_err();
        assert!(matches!(err, Error::Decrypt(_)));
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 1);

        let text = ctx.export_metrics().unwrap();
        assert!(text.contains("decrypt_requests_total 1"));
        assert!(text.contains("decrypt_failed_total{kind=\"submission\"} 1"));
    }

    #[test]
    fn coordinator_config_from_file_values() {
        let cfg: PayrollConfig = toml::from_str(
            r#"
            [chain]
            id = 31337
            rpc-url = "http://localhost:8545"
            confidential-contract = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
            fallback-contract = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"

            [gateway]
            base-url = "http://localhost:7077/"
            decrypt-url = "http://localhost:7077/v1/public-decrypt"

            [poll]
            max-attempts = 3
            interval-ms = 250
            "#,
        )
        .unwrap();

        let c = coordinator_config(&cfg);
        assert_eq!(c.chain_id(), 31337);
        assert_eq!(c.poll().max_attempts(), 3);
        assert_eq!(c.poll().interval(), Duration::from_millis(250));
        assert_eq!(c.callback_max_attempts(), 120);
        assert_eq!(c.callback_interval(), Duration::from_secs(2));
    }
}
