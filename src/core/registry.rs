//! Gateway-side view of the service registry.
//!
//! [`ServiceRegistry`] holds the latest snapshot of live instances per logical service, pulled
//! periodically from a [`RegistrySource`]. A snapshot is built completely off to the side and
//! then published in one atomic swap, so readers see either the old or the new view, never a
//! mix. When a poll fails the previous snapshot stays in place.
//!
//! Lookups fall back to a static table of base URLs when the registry has no live instance.
use std::{
    collections::{BTreeMap, HashMap as StdHashMap},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwap;
use tokio::time::MissedTickBehavior;

use crate::{
    config::ServerConfig,
    core::load_balancer::{InstanceSelector, LoadBalancerFactory, ServiceInstances},
    ports::registry::{RegistryError, RegistrySource},
    utils::ShutdownToken,
};

/// Canonical form of a logical service name: trimmed and upper-cased.
pub fn normalize_service_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// One published registry view.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    services: StdHashMap<String, Arc<ServiceInstances>>,
}

impl RegistrySnapshot {
    pub fn get(&self, service: &str) -> Option<&Arc<ServiceInstances>> {
        self.services.get(service)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

pub struct ServiceRegistry {
    source: Option<Arc<dyn RegistrySource>>,
    snapshot: ArcSwap<RegistrySnapshot>,
    fallbacks: StdHashMap<String, String>,
    selector: Box<dyn InstanceSelector>,
    poll_interval: Duration,
}

impl ServiceRegistry {
    pub fn new(
        source: Option<Arc<dyn RegistrySource>>,
        fallbacks: StdHashMap<String, String>,
        selector: Box<dyn InstanceSelector>,
        poll_interval: Duration,
    ) -> Self {
        let fallbacks = fallbacks
            .into_iter()
            .map(|(name, url)| (normalize_service_name(&name), url))
            .collect();
        Self {
            source,
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            fallbacks,
            selector,
            poll_interval,
        }
    }

    /// Build from configuration: fallback URLs (aliases included) and the selection policy.
    pub fn from_config(
        config: &ServerConfig,
        source: Option<Arc<dyn RegistrySource>>,
    ) -> Result<Self, String> {
        let mut fallbacks = StdHashMap::new();
        for (name, service) in &config.services {
            if let Some(url) = &service.fallback_url {
                fallbacks.insert(name.clone(), url.clone());
                for alias in &service.aliases {
                    fallbacks.insert(alias.clone(), url.clone());
                }
            }
        }

        let poll_interval = match &config.registry {
            Some(registry) => registry.poll_interval()?,
            None => Duration::from_secs(30),
        };

        Ok(Self::new(
            source,
            fallbacks,
            LoadBalancerFactory::create_strategy(&config.proxy.selection),
            poll_interval,
        ))
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Poll the registry once and publish a fresh snapshot.
    ///
    /// Only `UP` instances are kept. Applications with no live instance still appear with an
    /// empty list. A service keeps its round-robin position only while its instance count is
    /// unchanged.
    pub async fn refresh_once(&self) -> Result<usize, RegistryError> {
        let Some(source) = &self.source else {
            return Ok(0);
        };

        let applications = source.fetch_applications().await?;
        let previous = self.snapshot.load();

        let mut services = StdHashMap::with_capacity(applications.len());
        for app in applications {
            let name = normalize_service_name(&app.name);
            let urls: Vec<String> = app
                .instances
                .iter()
                .filter(|instance| instance.is_up())
                .map(|instance| instance.base_url())
                .collect();

            let cursor = previous
                .get(&name)
                .filter(|old| old.len() == urls.len())
                .map_or(0, |old| old.cursor());

            crate::metrics::set_registry_instances(&name, urls.len());
            services.insert(name, Arc::new(ServiceInstances::with_cursor(urls, cursor)));
        }

        let count = services.len();
        self.snapshot.store(Arc::new(RegistrySnapshot { services }));
        Ok(count)
    }

    /// Refresh immediately, then every poll interval until shutdown. Failures keep the
    /// previous snapshot and are retried on the next tick.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        if self.source.is_none() {
            tracing::info!("No service registry configured, using static fallback URLs only");
            return;
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh_once().await {
                        Ok(count) => {
                            crate::metrics::increment_registry_poll("success");
                            tracing::debug!(services = count, "Registry snapshot refreshed");
                        }
                        Err(e) => {
                            crate::metrics::increment_registry_poll("error");
                            tracing::error!(error = %e, "Registry poll failed, keeping previous snapshot");
                        }
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("Registry refresh loop stopped");
                    return;
                }
            }
        }
    }

    /// Base URL for one request to `service`, or `None` when neither the registry nor the
    /// fallback table has one.
    pub fn service_url(&self, service: &str) -> Option<String> {
        let name = normalize_service_name(service);
        let snapshot = self.snapshot.load();

        if let Some(url) = snapshot
            .get(&name)
            .and_then(|instances| self.selector.select(instances))
        {
            return Some(url);
        }

        let fallback = self.fallbacks.get(&name).cloned();
        if fallback.is_none() {
            tracing::error!(service = %name, "Unknown service requested");
        }
        fallback
    }

    /// Live instance URLs currently known for `service`.
    pub fn service_instances(&self, service: &str) -> Vec<String> {
        self.snapshot
            .load()
            .get(&normalize_service_name(service))
            .map(|instances| instances.urls().to_vec())
            .unwrap_or_default()
    }

    /// Every service in the current snapshot with its live instance count.
    pub fn all_services(&self) -> BTreeMap<String, usize> {
        self.snapshot
            .load()
            .services
            .iter()
            .map(|(name, instances)| (name.clone(), instances.len()))
            .collect()
    }
}
