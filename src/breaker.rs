//! Hand-rolled circuit breaker.
//!
//! No crate in this crate's dependency stack provides one, so this is a
//! small state machine over `std::sync` primitives: `Closed`, `Open{until}`,
//! `HalfOpen{inflight}`. One instance per dependency (storage, broker,
//! catalog, sandbox) — see `Breakers`.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::JudgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Tracks failures for one dependency and decides whether calls should be
/// allowed through, short-circuited, or used as half-open probes.
pub struct CircuitBreaker {
    name: &'static str,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    half_open_inflight: AtomicU32,
    failure_threshold: u32,
    open_duration: Duration,
    half_open_max_inflight: u32,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(
        name: &'static str,
        failure_threshold: u32,
        open_duration: Duration,
        half_open_max_inflight: u32,
    ) -> Self {
        Self {
            name,
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            half_open_inflight: AtomicU32::new(0),
            failure_threshold,
            open_duration,
            half_open_max_inflight,
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            CLOSED => BreakerState::Closed,
            OPEN => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }

    /// Whether a call should be attempted right now. Transitions Open ->
    /// HalfOpen once `open_duration` has elapsed.
    fn allow(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let opened_at = self.opened_at_ms.load(Ordering::Acquire);
                if self.now_ms().saturating_sub(opened_at) >= self.open_duration.as_millis() as u64
                {
                    if self
                        .state
                        .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        info!(breaker = self.name, "circuit half-open, probing");
                        self.half_open_inflight.store(0, Ordering::Release);
                    }
                    self.try_take_half_open_slot()
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => self.try_take_half_open_slot(),
        }
    }

    fn try_take_half_open_slot(&self) -> bool {
        let prev = self.half_open_inflight.fetch_add(1, Ordering::AcqRel);
        if prev < self.half_open_max_inflight {
            true
        } else {
            self.half_open_inflight.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    fn on_success(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                info!(breaker = self.name, "probe succeeded, closing circuit");
                self.state.store(CLOSED, Ordering::Release);
                self.consecutive_failures.store(0, Ordering::Release);
            }
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                warn!(breaker = self.name, "probe failed, reopening circuit");
                self.trip();
            }
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold {
                    warn!(breaker = self.name, failures, "failure threshold reached, opening circuit");
                    self.trip();
                }
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self) {
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        self.state.store(OPEN, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Run `op` through the breaker. Fails fast with `PermanentExternal`
    /// when the circuit is open; otherwise runs `op` and records the
    /// outcome.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, JudgeError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, JudgeError>>,
    {
        if !self.allow() {
            return Err(JudgeError::PermanentExternal(format!(
                "{} circuit breaker open",
                self.name
            )));
        }

        match op().await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }
}

/// The four independent breakers named in §4.10.
pub struct Breakers {
    pub storage: CircuitBreaker,
    pub broker: CircuitBreaker,
    pub catalog: CircuitBreaker,
    pub sandbox: CircuitBreaker,
}

impl Breakers {
    pub fn new(cfg: &crate::config::Config) -> Self {
        let make = |name| {
            CircuitBreaker::new(
                name,
                cfg.breaker_failure_threshold,
                cfg.breaker_open_duration,
                cfg.breaker_half_open_max_inflight,
            )
        };
        Self {
            storage: make("storage"),
            broker: make("broker"),
            catalog: make("catalog"),
            sandbox: make("sandbox"),
        }
    }

    pub fn open_count(&self) -> i64 {
        [&self.storage, &self.broker, &self.catalog, &self.sandbox]
            .iter()
            .filter(|b| b.is_open())
            .count() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 3, Duration::from_millis(50), 2)
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let b = breaker();
        for _ in 0..3 {
            let _ = b
                .call(|| async { Err::<(), _>(JudgeError::Transient("boom".into())) })
                .await;
        }
        assert!(b.is_open());
    }

    #[tokio::test]
    async fn stays_closed_below_threshold() {
        let b = breaker();
        for _ in 0..2 {
            let _ = b
                .call(|| async { Err::<(), _>(JudgeError::Transient("boom".into())) })
                .await;
        }
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let b = breaker();
        let _ = b.call(|| async { Err::<(), _>(JudgeError::Transient("x".into())) }).await;
        let _ = b.call(|| async { Ok::<_, JudgeError>(()) }).await;
        let _ = b.call(|| async { Err::<(), _>(JudgeError::Transient("x".into())) }).await;
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn half_opens_after_duration_and_closes_on_success() {
        let b = breaker();
        for _ in 0..3 {
            let _ = b.call(|| async { Err::<(), _>(JudgeError::Transient("x".into())) }).await;
        }
        assert!(b.is_open());
        tokio::time::sleep(Duration::from_millis(60)).await;
        let r = b.call(|| async { Ok::<_, JudgeError>(42) }).await;
        assert_eq!(r.unwrap(), 42);
        assert!(!b.is_open());
    }
}
