//! Failure-gated call guard.
//!
//! A [`CircuitBreaker`] opens after `failure_threshold` consecutive qualifying
//! failures, rejects calls while open, and after `reset_timeout_ms` lets a
//! bounded number of half-open probes through. A caller-supplied predicate
//! decides which failures qualify; all other failures are neutral and leave
//! the counters untouched.
//!
//! [`BreakerRegistry`] hands out one breaker per key.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::settings::BreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Wall-clock time the breaker last opened.
    pub opened_at_ms: Option<i64>,
    pub half_open_probes_in_flight: u32,
}

/// Why a guarded call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError<E> {
    /// Short-circuited; the wrapped call was not invoked.
    Open,
    /// The wrapped call ran and failed.
    Failed(E),
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at_ms: Option<i64>,
    opened_at_monotonic: u64,
    half_open_in_flight: u32,
}

pub struct CircuitBreaker {
    key: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_attempts: u32,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(key: impl Into<String>, settings: &BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: key.into(),
            failure_threshold: settings.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
            half_open_max_attempts: settings.half_open_max_attempts.max(1),
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at_ms: None,
                opened_at_monotonic: 0,
                half_open_in_flight: 0,
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run `call` if the breaker admits it.
    ///
    /// `counts` is consulted only for failures and decides whether that
    /// failure moves the breaker toward open.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Open`] without invoking `call` when the breaker is
    /// open or its half-open probe slots are taken, and [`CallError::Failed`]
    /// with the call's own error otherwise.
    pub fn execute<T, E, F, P>(&self, call: F, counts: P) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        P: FnOnce(&E) -> bool,
    {
        let Some(permit) = self.acquire() else {
            return Err(CallError::Open);
        };
        match call() {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(err) => {
                permit.fail(counts(&err));
                Err(CallError::Failed(err))
            }
        }
    }

    /// Current state, moving an expired `Open` to `HalfOpen`.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at_ms: inner.opened_at_ms,
            half_open_probes_in_flight: inner.half_open_in_flight,
        }
    }

    /// Force the breaker open, restarting the cooldown.
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        self.open(&mut inner);
    }

    /// Force the breaker closed with counters zeroed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        Self::close(&mut inner);
        log::info!("breaker {}: reset", self.key);
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => Some(Permit::new(self, false)),
            BreakerState::HalfOpen if inner.half_open_in_flight < self.half_open_max_attempts => {
                inner.half_open_in_flight += 1;
                log::debug!("breaker {}: half-open probe admitted", self.key);
                Some(Permit::new(self, true))
            }
            BreakerState::HalfOpen | BreakerState::Open => {
                log::debug!("breaker {}: call rejected", self.key);
                None
            }
        }
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let elapsed = self
            .clock
            .monotonic_ms()
            .saturating_sub(inner.opened_at_monotonic);
        if u128::from(elapsed) >= self.reset_timeout.as_millis() {
            inner.state = BreakerState::HalfOpen;
            inner.half_open_in_flight = 0;
            log::info!("breaker {}: half-open", self.key);
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at_ms = Some(self.clock.now_ms());
        inner.opened_at_monotonic = self.clock.monotonic_ms();
        inner.half_open_in_flight = 0;
        log::warn!(
            "breaker {}: open after {} consecutive failures",
            self.key,
            inner.consecutive_failures
        );
    }

    fn close(inner: &mut Inner) {
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at_ms = None;
        inner.half_open_in_flight = 0;
    }

    fn settle(&self, probe: bool, result: Settlement) {
        let mut inner = self.inner.lock();
        if probe && inner.state == BreakerState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        match result {
            Settlement::Success => {
                if inner.state != BreakerState::Closed {
                    log::info!("breaker {}: closed", self.key);
                }
                Self::close(&mut inner);
            }
            Settlement::Failure => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                match inner.state {
                    BreakerState::Closed
                        if inner.consecutive_failures >= self.failure_threshold =>
                    {
                        self.open(&mut inner);
                    }
                    BreakerState::HalfOpen => self.open(&mut inner),
                    // Late failures from calls admitted before opening keep the
                    // existing cooldown.
                    BreakerState::Closed | BreakerState::Open => {}
                }
            }
            Settlement::Neutral => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Success,
    Failure,
    Neutral,
}

/// Admission to one guarded call. Dropping it unsettled releases any probe
/// slot without touching the counters.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.breaker.settle(self.probe, Settlement::Success);
    }

    fn fail(mut self, counts: bool) {
        self.settled = true;
        let settlement = if counts {
            Settlement::Failure
        } else {
            Settlement::Neutral
        };
        self.breaker.settle(self.probe, settlement);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.probe, Settlement::Neutral);
        }
    }
}

/// Lazily created breakers, one per key.
pub struct BreakerRegistry {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for `key`, created on first use.
    #[must_use]
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }
        let breaker = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    key,
                    &self.settings,
                    Arc::clone(&self.clock),
                ))
            });
        Arc::clone(breaker.value())
    }

    /// Snapshot of every breaker created so far, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    pub fn trip(&self, key: &str) {
        self.get(key).trip();
    }

    /// Reset one breaker; returns `false` if none exists for `key`.
    pub fn reset(&self, key: &str) -> bool {
        match self.breakers.get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default(), Arc::new(SystemClock::new()))
    }
}
