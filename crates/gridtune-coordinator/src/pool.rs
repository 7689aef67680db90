//! Resource pool — bounds concurrent processor calls.
//!
//! A semaphore whose size is tuned by `optimize()`: the peak occupancy
//! since the previous pass, relative to capacity, grows the pool by one
//! step above `high_watermark` and shrinks it below `low_watermark`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use gridtune_core::ResourcePoolConfig;

use crate::error::{CoordinatorError, CoordinatorResult};

#[derive(Debug, Clone, PartialEq)]
pub struct PoolOptimization {
    pub from: usize,
    pub to: usize,
    pub peak_utilization: f64,
}

impl PoolOptimization {
    pub fn recommendations(&self) -> Vec<String> {
        if self.to > self.from {
            vec![format!(
                "processing slots raised from {} to {} (peak utilization {:.2})",
                self.from, self.to, self.peak_utilization
            )]
        } else if self.to < self.from {
            vec![format!(
                "processing slots lowered from {} to {} (peak utilization {:.2})",
                self.from, self.to, self.peak_utilization
            )]
        } else {
            Vec::new()
        }
    }
}

pub struct ResourcePool {
    semaphore: Arc<Semaphore>,
    capacity: AtomicUsize,
    in_use: Arc<AtomicUsize>,
    waiting: AtomicUsize,
    peak: AtomicUsize,
    config: RwLock<ResourcePoolConfig>,
}

/// A held processing slot. Released on drop.
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ResourcePool {
    pub fn new(config: ResourcePoolConfig) -> Self {
        let initial = config.initial_permits;
        Self {
            semaphore: Arc::new(Semaphore::new(initial)),
            capacity: AtomicUsize::new(initial),
            in_use: Arc::new(AtomicUsize::new(0)),
            waiting: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            config: RwLock::new(config),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> CoordinatorResult<PoolPermit> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let permit = Arc::clone(&self.semaphore).acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        let permit = permit.map_err(|_| CoordinatorError::Processing("resource pool closed".to_string()))?;

        let in_use = self.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(in_use, Ordering::Relaxed);
        Ok(PoolPermit {
            _permit: permit,
            in_use: Arc::clone(&self.in_use),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Callers waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Current occupancy, `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        let capacity = self.capacity();
        if capacity == 0 {
            return 1.0;
        }
        (self.in_use() as f64 / capacity as f64).min(1.0)
    }

    pub fn optimize(&self) -> PoolOptimization {
        let config = self.config.read().clone();
        let from = self.capacity();
        let peak = self.peak.swap(self.in_use(), Ordering::Relaxed);
        let peak_utilization = if from == 0 { 1.0 } else { peak as f64 / from as f64 };

        let target = if peak_utilization >= config.high_watermark {
            from.saturating_add(config.step)
        } else if peak_utilization <= config.low_watermark {
            from.saturating_sub(config.step)
        } else {
            from
        };
        let to = self.resize(target.clamp(config.min_permits, config.max_permits));
        if to != from {
            info!(from, to, peak_utilization, "resource pool resized");
        } else {
            debug!(capacity = from, peak_utilization, "resource pool unchanged");
        }
        PoolOptimization {
            from,
            to,
            peak_utilization,
        }
    }

    /// Move capacity toward `target`. Slots held by in-flight calls cannot
    /// be reclaimed at once, so a shrink may fall short; returns the new
    /// capacity.
    fn resize(&self, target: usize) -> usize {
        let current = self.capacity();
        if target > current {
            self.semaphore.add_permits(target - current);
            self.capacity.store(target, Ordering::Relaxed);
            target
        } else if target < current {
            let forgotten = self.semaphore.forget_permits(current - target);
            let now = current - forgotten;
            self.capacity.store(now, Ordering::Relaxed);
            now
        } else {
            current
        }
    }

    /// Apply new bounds, pulling the capacity inside them.
    pub fn reconfigure(&self, config: ResourcePoolConfig) {
        let bounds = (config.min_permits, config.max_permits);
        *self.config.write() = config;
        let current = self.capacity();
        self.resize(current.clamp(bounds.0, bounds.1));
    }
}
