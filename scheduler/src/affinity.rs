//! Model-affinity scheduling.
//!
//! Layers model eligibility (whitelist/blacklist) and a "model still warm"
//! preference on top of [`ShortestQueueScheduler`]. A backend counts as warm
//! for a model when that model was the last one it served and the affinity
//! window has passed since it last completed, mirroring the backend's own
//! model unload grace period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::{Backend, ScheduleFilter};
use crate::error::Result;
use crate::registry::BackendRegistry;
use crate::shortest_queue::ShortestQueueScheduler;
use crate::traits::Scheduler;

/// Default affinity window: 4 minutes 30 seconds.
pub const DEFAULT_AFFINITY_WINDOW: Duration = Duration::from_secs(4 * 60 + 30);

/// Scheduler preferring backends that already have the requested model.
pub struct ModelAffinityScheduler {
    inner: ShortestQueueScheduler,
    window: chrono::Duration,
}

impl ModelAffinityScheduler {
    /// Create a scheduler with the default affinity window.
    pub fn new(registry: Arc<BackendRegistry>, capacity: usize) -> Self {
        Self::with_window(registry, capacity, DEFAULT_AFFINITY_WINDOW)
    }

    /// Create a scheduler with a custom affinity window.
    pub fn with_window(registry: Arc<BackendRegistry>, capacity: usize, window: Duration) -> Self {
        Self {
            inner: ShortestQueueScheduler::new(registry, capacity),
            window: chrono::Duration::milliseconds(window.as_millis().min(i64::MAX as u128) as i64),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        self.inner.registry()
    }

    /// Eligible backends ordered for `model`: warm backends first, then every
    /// eligible backend in configuration order.
    ///
    /// Warm backends appear twice; the leading copy only biases the
    /// shortest-queue tie-break towards them.
    pub fn candidates(&self, model: &str) -> Vec<Arc<Backend>> {
        let now = Utc::now();
        let eligible = self.registry().eligible_with_usage(Some(model));

        let mut ordered: Vec<Arc<Backend>> = eligible
            .iter()
            .filter(|(_, usage)| usage.is_affinity_hot(model, self.window, now))
            .map(|(backend, _)| backend.clone())
            .collect();
        if !ordered.is_empty() {
            tracing::debug!("Backends warm for model {}: {}", model, ordered.len());
        }
        ordered.extend(eligible.into_iter().map(|(backend, _)| backend));
        ordered
    }
}

#[async_trait]
impl Scheduler for ModelAffinityScheduler {
    async fn enqueue(
        &self,
        filter: &ScheduleFilter,
        timeout: Option<Duration>,
    ) -> Result<Option<Arc<Backend>>> {
        let Some(model) = filter.model() else {
            let backend = self.inner.enqueue(filter, timeout).await?;
            // A model-less request says nothing about what is resident afterwards.
            if let Some(backend) = &backend {
                self.registry().mark_scheduled(&backend.name, None);
            }
            return Ok(backend);
        };

        let candidates = self.candidates(model);
        let backend = self.inner.select(&candidates, timeout).await?;

        match &backend {
            Some(backend) => {
                self.registry().mark_scheduled(&backend.name, Some(model));
                tracing::debug!("Scheduled model {} on backend {}", model, backend.name);
            }
            None => tracing::debug!("No backend eligible for model {}", model),
        }
        Ok(backend)
    }

    fn dequeue(&self, name: &str, ok: bool) -> Result<()> {
        if ok {
            let model = self.registry().usage(name).and_then(|u| u.last_model);
            self.registry().record_completion(name, model.as_deref(), true);
        }
        self.inner.dequeue(name, ok)
    }

    fn get_length(&self, name: &str) -> usize {
        self.inner.get_length(name)
    }

    fn name(&self) -> &str {
        "model_affinity"
    }
}
