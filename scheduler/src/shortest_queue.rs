//! Shortest-queue scheduling.
//!
//! Routes each request to the candidate with the fewest reserved slots,
//! favouring earlier-configured backends on ties. When every candidate is
//! full, waits in short rounds and re-evaluates occupancy between them so a
//! backend freed elsewhere is picked up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::backend::{Backend, ScheduleFilter};
use crate::error::{Result, SchedulerError};
use crate::registry::BackendRegistry;
use crate::slots::SlotQueue;
use crate::traits::Scheduler;

/// Longest single wait on one backend before occupancy is re-evaluated.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Scheduler picking the least occupied backend.
pub struct ShortestQueueScheduler {
    registry: Arc<BackendRegistry>,
    slots: SlotQueue,
}

impl ShortestQueueScheduler {
    /// Create a scheduler with `capacity` concurrent requests per backend.
    pub fn new(registry: Arc<BackendRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            slots: SlotQueue::new(capacity),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn slots(&self) -> &SlotQueue {
        &self.slots
    }

    /// Reserve a slot on the least occupied of `candidates`.
    ///
    /// Returns `Ok(None)` immediately for an empty candidate list.
    pub async fn select(
        &self,
        candidates: &[Arc<Backend>],
        timeout: Option<Duration>,
    ) -> Result<Option<Arc<Backend>>> {
        let start = Instant::now();
        let mut previous: Option<&str> = None;

        loop {
            let Some(backend) = self.shortest(candidates) else {
                return Ok(None);
            };
            if previous != Some(backend.name.as_str()) {
                tracing::debug!("Waiting for slot on backend {}", backend.name);
            }

            let attempt = match timeout {
                Some(limit) => limit.saturating_sub(start.elapsed()).min(RETRY_INTERVAL),
                None => RETRY_INTERVAL,
            };

            match self.slots.reserve(&backend.name, Some(attempt)).await {
                Ok(()) => return Ok(Some(backend.clone())),
                Err(SchedulerError::AdmissionTimeout(_)) => {
                    if let Some(limit) = timeout {
                        if start.elapsed() >= limit {
                            return Err(SchedulerError::AdmissionTimeout(limit));
                        }
                    }
                    tracing::debug!("Backend {} still full, re-evaluating queues", backend.name);
                    previous = Some(backend.name.as_str());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// First candidate with the lowest occupancy.
    fn shortest<'a>(&self, candidates: &'a [Arc<Backend>]) -> Option<&'a Arc<Backend>> {
        let mut best: Option<(&'a Arc<Backend>, usize)> = None;
        for backend in candidates {
            let length = self.slots.length(&backend.name);
            if best.map_or(true, |(_, min)| length < min) {
                best = Some((backend, length));
            }
            // Nothing beats an empty queue.
            if length == 0 {
                break;
            }
        }
        best.map(|(backend, _)| backend)
    }
}

#[async_trait]
impl Scheduler for ShortestQueueScheduler {
    async fn enqueue(
        &self,
        _filter: &ScheduleFilter,
        timeout: Option<Duration>,
    ) -> Result<Option<Arc<Backend>>> {
        let candidates = self.registry.all();
        let backend = self.select(&candidates, timeout).await?;
        tracing::debug!(
            "Scheduled on backend {}",
            backend.as_ref().map(|b| b.name.as_str()).unwrap_or("none")
        );
        Ok(backend)
    }

    fn dequeue(&self, name: &str, _ok: bool) -> Result<()> {
        self.slots.release(name)
    }

    fn get_length(&self, name: &str) -> usize {
        self.slots.length(name)
    }

    fn name(&self) -> &str {
        "shortest_queue"
    }
}
