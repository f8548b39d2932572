use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use parking_lot::Mutex;
use payroll_types::CorrelationId;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::{Gateway, Query, QueryReply};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Builder)]
pub struct PollOptions {
    /// Number of queries before giving up.
    #[builder(default = 60)]
    max_attempts: u32,

    /// Pause between two queries.
    #[builder(default = Duration::from_secs(5))]
    interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PollOptions {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Poll progress, reported before every query and once more on success.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub attempt: u32,
    pub total: u32,
    /// 100 only once the result is available.
    pub percent: u8,
}

impl PollProgress {
    fn querying(attempt: u32, total: u32) -> Self {
        let p = u64::from(attempt) * 100 / u64::from(total);
        Self {
            attempt,
            total,
            percent: p.min(99) as u8,
        }
    }

    fn done(attempt: u32, total: u32) -> Self {
        Self {
            attempt,
            total,
            percent: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub correlation: CorrelationId,
    pub payload: serde_json::Value,
    /// Number of queries sent, including the successful one.
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("correlation id {0} is already being polled")]
    AlreadyPolling(CorrelationId),

    #[error("no result for {correlation} after {attempts} attempts ({elapsed:?})")]
    Timeout {
        correlation: CorrelationId,
        attempts: u32,
        elapsed: Duration,
    },
}

/// Queries the gateway until a decryption result is available.
#[derive(Debug)]
pub struct Poller<G> {
    gateway: Arc<G>,
    active: Arc<Mutex<HashSet<CorrelationId>>>,
}

impl<G> Clone for Poller<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            active: self.active.clone(),
        }
    }
}

impl<G: Gateway> Poller<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn is_polling(&self, id: CorrelationId) -> bool {
        self.active.lock().contains(&id)
    }

    /// Poll for the result of `query`.
    ///
    /// Anything but a ready reply, including transport errors, counts as
    /// "not ready yet". A correlation id is polled by at most one caller at a
    /// time.
    pub async fn poll<F>(
        &self,
        query: &Query,
        opts: &PollOptions,
        mut on_progress: F,
    ) -> Result<PollOutcome, PollError>
    where
        F: FnMut(PollProgress),
    {
        let mut session = PollSession::start(self.active.clone(), query.correlation, opts)?;

        while let Some(attempt) = session.next_attempt() {
            on_progress(PollProgress::querying(attempt, session.total));

            match self.gateway.query(query).await {
                Ok(QueryReply::Ready(payload)) => {
                    on_progress(PollProgress::done(attempt, session.total));
                    debug!(correlation = %query.correlation, %attempt, "decryption result ready");
                    return Ok(PollOutcome {
                        correlation: query.correlation,
                        payload,
                        attempts: attempt,
                        elapsed: session.elapsed(),
                    });
                }
                Ok(QueryReply::NotReady) => {
                    debug!(correlation = %query.correlation, %attempt, "decryption result not ready")
                }
                Ok(QueryReply::Unexpected(status)) => {
                    warn!(correlation = %query.correlation, %attempt, %status, "unexpected gateway status")
                }
                Err(err) => {
                    warn!(correlation = %query.correlation, %attempt, %err, "gateway query failed")
                }
            }

            if attempt < session.total {
                sleep(session.interval).await
            }
        }

        Err(PollError::Timeout {
            correlation: query.correlation,
            attempts: session.total,
            elapsed: session.elapsed(),
        })
    }
}

/// State of one `poll` call. Releases the correlation id when dropped.
struct PollSession {
    active: Arc<Mutex<HashSet<CorrelationId>>>,
    correlation: CorrelationId,
    attempt: u32,
    total: u32,
    interval: Duration,
    started: Instant,
}

impl PollSession {
    fn start(
        active: Arc<Mutex<HashSet<CorrelationId>>>,
        correlation: CorrelationId,
        opts: &PollOptions,
    ) -> Result<Self, PollError> {
        if !active.lock().insert(correlation) {
            return Err(PollError::AlreadyPolling(correlation));
        }
        Ok(Self {
            active,
            correlation,
            attempt: 0,
            total: opts.max_attempts.max(1),
            interval: opts.interval,
            started: Instant::now(),
        })
    }

    fn next_attempt(&mut self) -> Option<u32> {
        if self.attempt >= self.total {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.active.lock().remove(&self.correlation);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use payroll_types::{Address, CorrelationId, U256};
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{PollError, PollOptions, Poller};
    use crate::{Error, Gateway, PollContext, Query, QueryReply};

    /// Not ready until the `ready_at`-th query.
    struct Countdown {
        ready_at: u32,
        queries: AtomicU32,
    }

    impl Countdown {
        fn new(ready_at: u32) -> Arc<Self> {
            Arc::new(Self {
                ready_at,
                queries: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Gateway for Countdown {
        async fn probe(&self) -> bool {
            true
        }

        async fn query(&self, _: &Query) -> Result<QueryReply, Error> {
            let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_at {
                return Ok(QueryReply::Ready(json!({ "decrypted": "1000" })));
            }
            // hiccups must not abort the poll
            if n % 2 == 0 {
                return Ok(QueryReply::Unexpected(StatusCode::BAD_GATEWAY));
            }
            Ok(QueryReply::NotReady)
        }
    }

    fn query(id: u64) -> Query {
        Query {
            correlation: CorrelationId::new(U256::from(id)),
            context: PollContext {
                contract: Address::repeat_byte(0xcc),
                chain_id: 11155111,
            },
        }
    }

    fn opts(max_attempts: u32, interval_ms: u64) -> PollOptions {
        PollOptions::builder()
            .max_attempts(max_attempts)
            .interval(Duration::from_millis(interval_ms))
            .build()
    }

    #[test]
    fn default_options() {
        let o = PollOptions::default();
        assert_eq!(o.max_attempts(), 60);
        assert_eq!(o.interval(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_nth_attempt() {
        payroll_utils::logging::init_logging();
        let gateway = Countdown::new(4);
        let poller = Poller::new(gateway.clone());
        let mut seen = Vec::new();

        let out = poller
            .poll(&query(1), &opts(10, 10), |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(out.attempts, 4);
        assert_eq!(out.payload["decrypted"], "1000");
        assert_eq!(gateway.queries.load(Ordering::SeqCst), 4);
        assert!(out.elapsed >= Duration::from_millis(30));

        let percents: Vec<u8> = seen.iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![10, 20, 30, 40, 100]);
        assert!(!poller.is_polling(CorrelationId::new(U256::from(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_attempts() {
        let gateway = Countdown::new(u32::MAX);
        let poller = Poller::new(gateway.clone());
        let mut seen = Vec::new();

        let err = poller
            .poll(&query(2), &opts(3, 10), |p| seen.push(p))
            .await
            .unwrap_err();

        let PollError::Timeout {
            attempts, elapsed, ..
        } = err
        else {
            panic!("expected timeout, got {err:?}")
        };
        assert_eq!(attempts, 3);
        assert!(elapsed >= Duration::from_millis(20));
        assert_eq!(gateway.queries.load(Ordering::SeqCst), 3);

        let percents: Vec<u8> = seen.iter().map(|p| p.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents.iter().all(|p| *p < 100));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_concurrent_poll_of_same_id() {
        let poller = Poller::new(Countdown::new(3));
        let q = query(3);
        let o = opts(5, 10);

        let first = poller.poll(&q, &o, |_| {});
        let second = async {
            tokio::task::yield_now().await;
            assert!(poller.is_polling(q.correlation));
            poller.poll(&q, &o, |_| {}).await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap().attempts, 3);
        assert_eq!(second.unwrap_err(), PollError::AlreadyPolling(q.correlation));

        // released once done
        let again = poller.poll(&q, &o, |_| {}).await.unwrap();
        assert_eq!(again.attempts, 1);
    }
}
