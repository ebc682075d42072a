//! Per-service circuit breakers.
//!
//! A [`CircuitBreaker`] guards calls to one logical service:
//!
//! * **Closed**: requests flow; failures are counted and reaching the threshold opens it.
//!   A success clears the count.
//! * **Open**: requests are rejected until strictly more than `reset_timeout` has passed since
//!   the last transition, then the next check moves it to half-open and lets that request in.
//! * **HalfOpen**: requests flow; one success closes the breaker, one failure re-opens it.
//!
//! Each breaker keeps its whole state behind one mutex so every check-and-transition is a single
//! critical section. [`CircuitBreakerTable`] hands out breakers keyed by service name and creates
//! them on first use through the map's entry API, so concurrent first requests for a new
//! service always share one breaker.
use std::{
    collections::HashMap as StdHashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use scc::HashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::core::registry::normalize_service_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_state_change: Instant,
}

/// Read-only view of a breaker for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub since_last_change_ms: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            service: service.into(),
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_state_change: Instant::now(),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn settings(&self) -> CircuitBreakerSettings {
        self.settings
    }

    // State stays consistent across a panicking holder since every write is a plain assignment.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.last_state_change = Instant::now();

        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                %from,
                failures = inner.failure_count,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(service = %self.service, %from, "Circuit half-open, probing")
            }
            CircuitState::Closed => tracing::info!(service = %self.service, %from, "Circuit closed"),
        }
        crate::metrics::set_circuit_state(&self.service, to);
    }

    /// Whether a request may be forwarded now. Moves an expired Open breaker to HalfOpen.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.last_state_change.elapsed() > self.settings.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => inner.failure_count = 0,
            // A late response from before the breaker opened does not close it.
            CircuitState::Open => {}
        }
    }

    pub fn failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.settings.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Force the breaker back to Closed with a clean failure count.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        } else {
            inner.last_state_change = Instant::now();
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.settings.failure_threshold,
            reset_timeout_ms: self.settings.reset_timeout.as_millis() as u64,
            since_last_change_ms: inner.last_state_change.elapsed().as_millis() as u64,
        }
    }
}

/// Lazily populated map of service name to breaker.
pub struct CircuitBreakerTable {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerSettings,
    overrides: StdHashMap<String, CircuitBreakerSettings>,
}

impl CircuitBreakerTable {
    pub fn new(defaults: CircuitBreakerSettings) -> Self {
        Self::with_overrides(defaults, StdHashMap::new())
    }

    /// `overrides` is keyed by service name in any case.
    pub fn with_overrides(
        defaults: CircuitBreakerSettings,
        overrides: StdHashMap<String, CircuitBreakerSettings>,
    ) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(name, settings)| (normalize_service_name(&name), settings))
            .collect();
        Self {
            breakers: HashMap::new(),
            defaults,
            overrides,
        }
    }

    fn settings_for(&self, service: &str) -> CircuitBreakerSettings {
        self.overrides.get(service).copied().unwrap_or(self.defaults)
    }

    /// Fetch the breaker for `service`, creating it in the same atomic step if absent.
    pub async fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        let key = normalize_service_name(service);
        if let Some(existing) = self.breakers.get_async(&key).await {
            return existing.get().clone();
        }

        let settings = self.settings_for(&key);
        let entry = self
            .breakers
            .entry_async(key.clone())
            .await
            .or_insert_with(|| {
                tracing::debug!(service = %key, ?settings, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(key.clone(), settings))
            });
        entry.get().clone()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots of every breaker created so far, sorted by service name.
    pub async fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut out = Vec::with_capacity(self.breakers.len());
        self.breakers
            .retain_async(|_, breaker| {
                out.push(breaker.snapshot());
                true
            })
            .await;
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }
}
