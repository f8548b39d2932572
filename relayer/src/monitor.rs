use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use payroll_types::GatewayState;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Gateway;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;
type Listeners = Mutex<BTreeMap<u64, Listener>>;

/// Tracks gateway reachability and reports up/down transitions.
///
/// The monitor is the only writer of the published [`GatewayState`].
pub struct HealthMonitor<G> {
    inner: Arc<Inner<G>>,
}

impl<G> Clone for HealthMonitor<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<G> {
    gateway: Arc<G>,
    state: watch::Sender<GatewayState>,
    /// Last definitive probe result, `None` before the first probe.
    previous: Mutex<Option<bool>>,
    listeners: Arc<Listeners>,
    next_id: AtomicU64,
    /// Held while a probe is in flight.
    busy: AsyncMutex<()>,
}

impl<G: Gateway + 'static> HealthMonitor<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        let (state, _) = watch::channel(GatewayState::default());
        Self {
            inner: Arc::new(Inner {
                gateway,
                state,
                previous: Mutex::new(None),
                listeners: Arc::new(Mutex::new(BTreeMap::new())),
                next_id: AtomicU64::new(0),
                busy: AsyncMutex::new(()),
            }),
        }
    }

    /// Current gateway state.
    pub fn state(&self) -> GatewayState {
        *self.inner.state.borrow()
    }

    /// Receive every update of the gateway state.
    pub fn subscribe(&self) -> watch::Receiver<GatewayState> {
        self.inner.state.subscribe()
    }

    /// Probe the gateway without touching any state.
    pub async fn probe(&self) -> bool {
        self.inner.gateway.probe().await
    }

    /// Probe the gateway right now.
    ///
    /// The status reads `Checking` until the probe completes. Waits for a
    /// probe already in flight before starting its own.
    pub async fn refresh(&self) -> bool {
        let _guard = self.inner.busy.lock().await;
        self.inner.state.send_modify(|s| *s = s.checking());
        let up = self.inner.gateway.probe().await;
        self.inner.observe(up);
        up
    }

    /// Probe now and then every `period`, invoking `on_change` whenever the
    /// result differs from the previous one.
    ///
    /// The first result of a monitor without any earlier probe only sets the
    /// baseline. `on_change` runs while the listener table is locked and must
    /// not start or cancel monitoring itself.
    pub fn start_monitoring<F>(&self, on_change: F, period: Duration) -> MonitorHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(on_change));

        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let cancelled = token.clone();
        let period = period.max(Duration::from_millis(1));

        let task = spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                select! {
                    _ = cancelled.cancelled() => break,
                    _ = timer.tick() => {}
                }
                select! {
                    _ = cancelled.cancelled() => break,
                    _ = inner.check() => {}
                }
            }
            debug!("gateway monitoring stopped");
        });

        MonitorHandle {
            id,
            token,
            task,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }
}

impl<G: Gateway> Inner<G> {
    async fn check(&self) {
        let Ok(_guard) = self.busy.try_lock() else {
            debug!("gateway probe in flight, skipping");
            return;
        };
        let up = self.gateway.probe().await;
        self.observe(up)
    }

    fn observe(&self, up: bool) {
        self.state
            .send_replace(GatewayState::observed(up, Instant::now()));

        let prev = self.previous.lock().replace(up);
        if prev.is_none() || prev == Some(up) {
            return;
        }

        info!(up, "gateway status changed");
        for listener in self.listeners.lock().values() {
            listener(up)
        }
    }
}

/// Stops monitoring when cancelled or dropped.
#[derive(Debug)]
pub struct MonitorHandle {
    id: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
    listeners: Weak<Listeners>,
}

impl MonitorHandle {
    /// Stop probing. No `on_change` call happens after this returns.
    ///
    /// Calling it again has no effect.
    pub fn cancel(&self) {
        self.token.cancel();
        self.task.abort();
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(&self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel()
    }
}
