//! In-process per-service request statistics.
//!
//! Counters and latency samples accumulate for one reporting period and are then cleared all
//! at once. Figures are therefore "since the last period boundary", not a trailing average,
//! and drop to zero right after each reset.
use std::{
    collections::{BTreeMap, HashMap as StdHashMap},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{core::registry::normalize_service_name, utils::ShutdownToken};

#[derive(Debug, Default)]
struct ServiceWindow {
    requests: u64,
    errors: u64,
    rejected: u64,
    response_times: Vec<Duration>,
}

impl ServiceWindow {
    fn average_response_time(&self) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.response_times.iter().sum();
        total / self.response_times.len() as u32
    }

    fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }
}

#[derive(Debug)]
struct MetricsWindow {
    services: StdHashMap<String, ServiceWindow>,
    started_at: DateTime<Utc>,
}

impl MetricsWindow {
    fn new() -> Self {
        Self {
            services: StdHashMap::new(),
            started_at: Utc::now(),
        }
    }
}

/// Figures for one service in the current window.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceReport {
    pub requests: u64,
    pub errors: u64,
    pub rejected: u64,
    pub error_rate: f64,
    pub average_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub window_started_at: DateTime<Utc>,
    pub reporting_period_secs: u64,
    pub services: BTreeMap<String, ServiceReport>,
}

pub struct ServiceMetrics {
    window: Mutex<MetricsWindow>,
    reporting_period: Duration,
}

impl ServiceMetrics {
    pub fn new(reporting_period: Duration) -> Self {
        Self {
            window: Mutex::new(MetricsWindow::new()),
            reporting_period,
        }
    }

    pub fn reporting_period(&self) -> Duration {
        self.reporting_period
    }

    fn lock(&self) -> MutexGuard<'_, MetricsWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, service: &str, f: impl FnOnce(&mut ServiceWindow)) {
        let mut window = self.lock();
        f(window
            .services
            .entry(normalize_service_name(service))
            .or_default());
    }

    fn read<T>(&self, service: &str, f: impl FnOnce(&ServiceWindow) -> T, empty: T) -> T {
        self.lock()
            .services
            .get(&normalize_service_name(service))
            .map_or(empty, f)
    }

    pub fn record_request(&self, service: &str) {
        self.update(service, |w| w.requests += 1);
    }

    pub fn record_error(&self, service: &str) {
        self.update(service, |w| w.errors += 1);
    }

    /// A request turned away by the open breaker. Not counted as a request.
    pub fn record_rejection(&self, service: &str) {
        self.update(service, |w| w.rejected += 1);
    }

    pub fn record_response_time(&self, service: &str, duration: Duration) {
        self.update(service, |w| w.response_times.push(duration));
    }

    pub fn request_count(&self, service: &str) -> u64 {
        self.read(service, |w| w.requests, 0)
    }

    pub fn error_count(&self, service: &str) -> u64 {
        self.read(service, |w| w.errors, 0)
    }

    pub fn rejected_count(&self, service: &str) -> u64 {
        self.read(service, |w| w.rejected, 0)
    }

    pub fn average_response_time(&self, service: &str) -> Duration {
        self.read(service, ServiceWindow::average_response_time, Duration::ZERO)
    }

    /// `errors / requests`, 0 when nothing was forwarded.
    pub fn error_rate(&self, service: &str) -> f64 {
        self.read(service, ServiceWindow::error_rate, 0.0)
    }

    /// Clear every counter and sample for every service.
    pub fn reset(&self) {
        *self.lock() = MetricsWindow::new();
    }

    pub fn snapshot(&self) -> MetricsReport {
        let window = self.lock();
        let services = window
            .services
            .iter()
            .map(|(name, w)| {
                (
                    name.clone(),
                    ServiceReport {
                        requests: w.requests,
                        errors: w.errors,
                        rejected: w.rejected,
                        error_rate: w.error_rate(),
                        average_response_time_ms: w.average_response_time().as_secs_f64()
                            * 1000.0,
                    },
                )
            })
            .collect();

        MetricsReport {
            window_started_at: window.started_at,
            reporting_period_secs: self.reporting_period.as_secs(),
            services,
        }
    }

    /// Hard-reset the window every reporting period until shutdown.
    pub async fn run_reset_loop(&self, mut shutdown: ShutdownToken) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.reporting_period, self.reporting_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::debug!("Resetting service metrics window");
                    self.reset();
                }
                _ = shutdown.wait_for_shutdown() => {
                    tracing::debug!("Metrics reset loop stopped");
                    return;
                }
            }
        }
    }
}
