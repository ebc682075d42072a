use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::config::SelectionStrategy;

/// Live instance URLs of one logical service together with its round-robin cursor.
///
/// A value of this type is published as part of a registry snapshot and never mutated
/// afterwards except for the cursor, so the cursor can never point past the list it
/// belongs to.
#[derive(Debug, Default)]
pub struct ServiceInstances {
    urls: Vec<String>,
    cursor: AtomicUsize,
}

impl ServiceInstances {
    pub fn new(urls: Vec<String>) -> Self {
        Self::with_cursor(urls, 0)
    }

    /// Build an entry whose round-robin position starts at `cursor` (wrapped into range).
    pub fn with_cursor(urls: Vec<String>, cursor: usize) -> Self {
        let cursor = if urls.is_empty() {
            0
        } else {
            cursor % urls.len()
        };
        Self {
            urls,
            cursor: AtomicUsize::new(cursor),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Current round-robin position.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Return the current cursor and advance it modulo the list length.
    fn advance(&self) -> usize {
        let len = self.urls.len();
        // fetch_update only fails when the closure returns None, which it never does.
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
        {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

/// Picks one instance URL per call from a service's live instances.
pub trait InstanceSelector: Send + Sync + 'static {
    fn select(&self, instances: &ServiceInstances) -> Option<String>;

    fn boxed(self) -> Box<dyn InstanceSelector>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Cycles through the instances in order, one per call.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy;

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl InstanceSelector for RoundRobinStrategy {
    fn select(&self, instances: &ServiceInstances) -> Option<String> {
        if instances.is_empty() {
            return None;
        }
        let index = instances.advance();
        instances.urls.get(index).cloned()
    }
}

/// Uniform random pick, no shared state.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl InstanceSelector for RandomStrategy {
    fn select(&self, instances: &ServiceInstances) -> Option<String> {
        if instances.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..instances.len());
        instances.urls.get(index).cloned()
    }
}

/// Factory for creating selectors from configuration
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    pub fn create_strategy(strategy: &SelectionStrategy) -> Box<dyn InstanceSelector> {
        match strategy {
            SelectionStrategy::RoundRobin => RoundRobinStrategy::new().boxed(),
            SelectionStrategy::Random => RandomStrategy::new().boxed(),
        }
    }
}
