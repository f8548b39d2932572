use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use payroll_contract::{Ledger, LedgerCall, LedgerError, Receipt, events};
use payroll_types::{
    CorrelationId, Decrypted, DecryptionRequest, Failure, InvalidTransition, LifecycleState,
    Progress, SubjectId, U256,
};
use prometheus::Registry;
use relayer::{Gateway, PollContext, PollError, Poller, Query};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::{CoordinatorConfig, DecryptError, DecryptMetrics};

/// Overall progress once submission has begun.
const SUBMITTED: u8 = 10;
/// Overall progress once a transaction has been sent.
const SENT: u8 = 20;
/// Start of the gateway polling band.
const POLL_START: u8 = 30;
/// Start of the callback band.
const CALLBACK_START: u8 = 80;
/// Width of the callback band.
const CALLBACK_BAND: u64 = 15;

/// A lifecycle transition or progress change of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub subject: SubjectId,
    pub state: LifecycleState,
    pub progress: Progress,
    pub correlation: Option<CorrelationId>,
    pub failure: Option<Failure>,
}

impl Event {
    fn of(r: &DecryptionRequest) -> Self {
        Self {
            subject: r.subject(),
            state: r.state(),
            progress: r.progress(),
            correlation: r.correlation(),
            failure: r.failure().map(|(f, _)| f),
        }
    }
}

/// Drives decryption requests through their lifecycle.
///
/// At most one request per subject is active at any time. Requests of
/// different subjects run independently.
pub struct Coordinator<L, G> {
    inner: Arc<Inner<L, G>>,
}

impl<L, G> Clone for Coordinator<L, G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<L, G> {
    ledger: Arc<L>,
    poller: Poller<G>,
    config: CoordinatorConfig,
    requests: Mutex<HashMap<SubjectId, DecryptionRequest>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
    metrics: DecryptMetrics,
}

impl<L: Ledger, G: Gateway> Coordinator<L, G> {
    pub fn new(
        ledger: Arc<L>,
        gateway: Arc<G>,
        config: CoordinatorConfig,
        registry: &Registry,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                ledger,
                poller: Poller::new(gateway),
                config,
                requests: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                metrics: DecryptMetrics::new(registry)?,
            }),
        })
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.inner.ledger
    }

    pub fn metrics(&self) -> &DecryptMetrics {
        &self.inner.metrics
    }

    /// Receive every subsequent transition and progress change.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Snapshot of the latest request of `subject`.
    pub fn status(&self, subject: &SubjectId) -> Option<DecryptionRequest> {
        self.inner.requests.lock().get(subject).cloned()
    }

    pub fn result(&self, subject: &SubjectId) -> Option<Decrypted> {
        self.inner
            .requests
            .lock()
            .get(subject)
            .and_then(|r| r.result().copied())
    }

    /// Forget a finished request, returning `true` if one was removed.
    ///
    /// This is the only way to start over after the retry budget of a
    /// subject is exhausted.
    pub fn acknowledge(&self, subject: &SubjectId) -> bool {
        let mut requests = self.inner.requests.lock();
        if requests.get(subject).is_some_and(|r| r.state().is_terminal()) {
            requests.remove(subject);
            return true;
        }
        false
    }

    /// Decrypt the value of `subject`.
    ///
    /// Rejected without any state change if a request of `subject` is in
    /// flight. A finished request is replaced, unless its retry budget is
    /// exhausted.
    pub async fn request_decryption(&self, subject: SubjectId) -> Result<Decrypted, DecryptError> {
        let event = {
            let mut requests = self.inner.requests.lock();
            if let Some(r) = requests.get(&subject) {
                if r.state().is_active() {
                    return Err(DecryptError::AlreadyInFlight(subject));
                }
                if r.is_exhausted() {
                    return Err(DecryptError::RetryBudgetExhausted {
                        subject,
                        retries: r.retries(),
                    });
                }
            }
            let mut r = DecryptionRequest::new(subject);
            r.start()?;
            let e = Event::of(&r);
            requests.insert(subject, r);
            e
        };
        self.inner.metrics.started.inc();
        self.inner.metrics.in_flight.inc();
        info!(%subject, "decryption requested");
        self.publish(event);
        self.run(subject, false).await
    }

    /// Retry a request which failed with a transient error.
    ///
    /// Sends the contract's retry transaction and then goes through the whole
    /// lifecycle again. Fails permanently once the contract's retry ceiling
    /// is reached.
    pub async fn retry_request(&self, subject: SubjectId) -> Result<Decrypted, DecryptError> {
        self.retryable(&subject)?;

        let max = self
            .inner
            .ledger
            .max_retries()
            .await
            .map_err(|source| DecryptError::Ledger { subject, source })?;

        // The record may have changed while the ceiling was read.
        let (event, retry) = {
            let mut requests = self.inner.requests.lock();
            let r = requests
                .get_mut(&subject)
                .ok_or(DecryptError::UnknownSubject(subject))?;
            check_retryable(r)?;
            if r.retries() >= max {
                let err = DecryptError::RetryBudgetExhausted {
                    subject,
                    retries: r.retries(),
                };
                r.fail(Failure::RetryBudgetExhausted, err.to_string());
                let e = Event::of(r);
                drop(requests);
                self.inner
                    .metrics
                    .failed
                    .with_label_values(&[Failure::RetryBudgetExhausted.as_str()])
                    .inc();
                warn!(%subject, retries = %max, "retry budget exhausted");
                self.publish(e);
                return Err(err);
            }
            r.start()?;
            r.record_retry();
            (Event::of(r), r.retries())
        };
        self.inner.metrics.retries.inc();
        self.inner.metrics.in_flight.inc();
        info!(%subject, %retry, %max, "retrying decryption");
        self.publish(event);
        self.run(subject, true).await
    }

    fn retryable(&self, subject: &SubjectId) -> Result<(), DecryptError> {
        let requests = self.inner.requests.lock();
        let r = requests
            .get(subject)
            .ok_or(DecryptError::UnknownSubject(*subject))?;
        check_retryable(r)
    }

    async fn run(&self, subject: SubjectId, retry: bool) -> Result<Decrypted, DecryptError> {
        let attempt = Attempt::new(self.inner.clone(), subject);
        let result = self.drive(subject, retry).await;
        attempt.finish();
        match result {
            Ok(d) => {
                self.inner.metrics.succeeded.inc();
                info!(%subject, correlation = %d.correlation, "decryption succeeded");
                Ok(d)
            }
            Err(err) => {
                let f = err.failure().unwrap_or(Failure::Ledger);
                self.inner
                    .metrics
                    .failed
                    .with_label_values(&[f.as_str()])
                    .inc();
                error!(%subject, %err, retryable = %err.is_retryable(), "decryption failed");
                if let Err(e) = self.update(subject, |r| r.fail(f, err.to_string())) {
                    warn!(%subject, %e, "request vanished before it failed")
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, subject: SubjectId, retry: bool) -> Result<Decrypted, DecryptError> {
        let contract = self.inner.ledger.address();

        self.advance(subject, SUBMITTED);
        if retry {
            self.transact(subject, LedgerCall::RetryDecryption(subject.plan()))
                .await?;
        }
        let receipt = self
            .transact(subject, LedgerCall::RequestDecryption(subject.plan()))
            .await?;

        let correlation = events::correlation_id(&receipt, contract, &subject).ok_or(
            DecryptError::CorrelationIdMissing {
                subject,
                tx: receipt.tx_hash,
            },
        )?;
        self.update(subject, |r| -> Result<(), InvalidTransition> {
            r.polling(correlation)?;
            r.advance(Progress::new(POLL_START));
            Ok(())
        })??;
        debug!(%subject, %correlation, "polling gateway");

        let query = Query {
            correlation,
            context: PollContext {
                contract,
                chain_id: self.inner.config.chain_id,
            },
        };
        let polled = self
            .inner
            .poller
            .poll(&query, &self.inner.config.poll, |p| {
                self.advance(subject, POLL_START + p.percent / 2)
            })
            .await;
        let queries = match &polled {
            Ok(o) => o.attempts,
            Err(PollError::Timeout { attempts, .. }) => *attempts,
            Err(PollError::AlreadyPolling(_)) => 0,
        };
        self.inner.metrics.poll_attempts.inc_by(u64::from(queries));
        let outcome = polled.map_err(|e| match e {
            PollError::Timeout {
                attempts, elapsed, ..
            } => DecryptError::PollTimeout {
                subject,
                correlation,
                attempts,
                elapsed,
            },
            PollError::AlreadyPolling(correlation) => DecryptError::DuplicateCorrelation {
                subject,
                correlation,
            },
        })?;
        debug!(%subject, %correlation, attempts = %outcome.attempts, payload = %outcome.payload, "gateway result");

        self.update(subject, |r| -> Result<(), InvalidTransition> {
            r.awaiting_callback()?;
            r.advance(Progress::new(CALLBACK_START));
            Ok(())
        })??;

        let value = self.await_callback(subject, correlation).await?;
        let d = self.update(subject, |r| r.succeed(value))??;
        Ok(d)
    }

    /// Send a transaction and wait for its successful inclusion.
    async fn transact(&self, subject: SubjectId, call: LedgerCall) -> Result<Receipt, DecryptError> {
        let submission = move |source| DecryptError::Submission { subject, source };
        let tx = self.inner.ledger.submit(call).await.map_err(submission)?;
        debug!(%subject, ?call, %tx, "transaction sent");
        self.advance(subject, SENT);
        let receipt = self.inner.ledger.confirm(tx).await.map_err(submission)?;
        if !receipt.success {
            return Err(submission(LedgerError::Reverted(tx)));
        }
        Ok(receipt)
    }

    /// Read the ledger until the callback has finalized the decrypted value.
    ///
    /// Read errors count as "not yet finalized".
    async fn await_callback(
        &self,
        subject: SubjectId,
        correlation: CorrelationId,
    ) -> Result<U256, DecryptError> {
        let total = self.inner.config.callback_max_attempts.max(1);
        let start = Instant::now();
        for attempt in 1..=total {
            let band = u64::from(attempt - 1) * CALLBACK_BAND / u64::from(total);
            self.advance(subject, CALLBACK_START + band as u8);

            match self.inner.ledger.decryption_state(&subject).await {
                Ok(s) if s.finalized => return Ok(s.value),
                Ok(_) => debug!(%subject, %attempt, "callback pending"),
                Err(err) => warn!(%subject, %attempt, %err, "failed to read decryption state"),
            }

            if attempt < total {
                sleep(self.inner.config.callback_interval).await
            }
        }
        Err(DecryptError::CallbackTimeout {
            subject,
            correlation,
            attempts: total,
            elapsed: start.elapsed(),
        })
    }

    /// Mutate the record of `subject` and publish the result.
    fn update<F, T>(&self, subject: SubjectId, f: F) -> Result<T, DecryptError>
    where
        F: FnOnce(&mut DecryptionRequest) -> T,
    {
        let (t, event) = {
            let mut requests = self.inner.requests.lock();
            let r = requests
                .get_mut(&subject)
                .ok_or(DecryptError::UnknownSubject(subject))?;
            let t = f(r);
            (t, Event::of(r))
        };
        self.publish(event);
        Ok(t)
    }

    fn advance(&self, subject: SubjectId, percent: u8) {
        let event = {
            let mut requests = self.inner.requests.lock();
            requests
                .get_mut(&subject)
                .and_then(|r| r.advance(Progress::new(percent)).then(|| Event::of(r)))
        };
        if let Some(e) = event {
            self.publish(e)
        }
    }

    fn publish(&self, e: Event) {
        self.inner.publish(e)
    }
}

impl<L, G> Inner<L, G> {
    fn publish(&self, e: Event) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(e.clone()).is_ok())
    }

    /// Fail the still active record of `subject` after its driver went away.
    fn abandon(&self, subject: SubjectId) {
        let event = {
            let mut requests = self.requests.lock();
            requests
                .get_mut(&subject)
                .filter(|r| r.state().is_active())
                .map(|r| {
                    r.fail(Failure::Cancelled, "decryption abandoned by caller".into());
                    Event::of(r)
                })
        };
        let Some(e) = event else { return };
        self.metrics
            .failed
            .with_label_values(&[Failure::Cancelled.as_str()])
            .inc();
        warn!(%subject, state = %e.state, progress = %e.progress, "decryption abandoned");
        self.publish(e)
    }
}

/// One run of the lifecycle. Accounts for the run in the in-flight gauge and
/// fails the record if dropped before [`Attempt::finish`].
struct Attempt<L, G> {
    inner: Arc<Inner<L, G>>,
    subject: SubjectId,
    finished: bool,
}

impl<L, G> Attempt<L, G> {
    fn new(inner: Arc<Inner<L, G>>, subject: SubjectId) -> Self {
        Self {
            inner,
            subject,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true
    }
}

impl<L, G> Drop for Attempt<L, G> {
    fn drop(&mut self) {
        self.inner.metrics.in_flight.dec();
        if !self.finished {
            self.inner.abandon(self.subject)
        }
    }
}

fn check_retryable(r: &DecryptionRequest) -> Result<(), DecryptError> {
    match r.state() {
        LifecycleState::Failed if r.is_exhausted() => Err(DecryptError::RetryBudgetExhausted {
            subject: r.subject(),
            retries: r.retries(),
        }),
        LifecycleState::Failed if r.failure().is_some_and(|(f, _)| f.is_retryable()) => Ok(()),
        s if s.is_active() => Err(DecryptError::AlreadyInFlight(r.subject())),
        state => Err(DecryptError::NotRetryable {
            subject: r.subject(),
            state,
        }),
    }
}
