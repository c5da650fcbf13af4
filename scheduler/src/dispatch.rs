//! Dispatch coordination: binds one scheduling decision to one request.
//!
//! [`Dispatcher::schedule`] hands out a [`Reservation`] which owns the
//! reserved slot. The slot is released exactly once, either explicitly via
//! [`Reservation::release`] or, if the request is abandoned (error, panic,
//! cancelled future, dropped response stream), when the guard is dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{Backend, ScheduleFilter};
use crate::error::SchedulerError;
use crate::registry::BackendRegistry;
use crate::traits::Scheduler;

/// Errors surfaced to the request handler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No configured backend may serve the request.
    #[error(
        "No backend available{}",
        .0.as_ref().map(|m| format!(" for model '{}'", m)).unwrap_or_default()
    )]
    NoBackendAvailable(Option<String>),

    /// Every eligible backend stayed full for the whole admission timeout.
    #[error("Timed out after {0:?} waiting for backend capacity")]
    AdmissionTimeout(Duration),

    #[error(transparent)]
    Scheduler(SchedulerError),
}

impl From<SchedulerError> for DispatchError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::AdmissionTimeout(d) => Self::AdmissionTimeout(d),
            other => Self::Scheduler(other),
        }
    }
}

/// Entry point for request handlers.
pub struct Dispatcher {
    scheduler: Arc<dyn Scheduler>,
    registry: Arc<BackendRegistry>,
    admission_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// `admission_timeout` of `None` waits for capacity without bound.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        registry: Arc<BackendRegistry>,
        admission_timeout: Option<Duration>,
    ) -> Self {
        Self {
            scheduler,
            registry,
            admission_timeout,
        }
    }

    /// Schedule a request using the configured admission timeout.
    pub async fn schedule(&self, filter: &ScheduleFilter) -> Result<Reservation, DispatchError> {
        self.schedule_within(filter, self.admission_timeout).await
    }

    /// Schedule a request with an explicit admission timeout.
    pub async fn schedule_within(
        &self,
        filter: &ScheduleFilter,
        timeout: Option<Duration>,
    ) -> Result<Reservation, DispatchError> {
        match self.scheduler.enqueue(filter, timeout).await? {
            Some(backend) => Ok(Reservation {
                backend,
                scheduler: self.scheduler.clone(),
                released: false,
            }),
            None => Err(DispatchError::NoBackendAvailable(filter.model().map(str::to_string))),
        }
    }

    /// Reserved slots on a backend.
    pub fn queue_length(&self, name: &str) -> usize {
        self.scheduler.get_length(name)
    }

    /// The backend with the fewest reserved slots, without reserving one.
    ///
    /// Ties go to the earlier-configured backend.
    pub fn least_loaded(&self) -> Option<Arc<Backend>> {
        let mut best: Option<(Arc<Backend>, usize)> = None;
        for backend in self.registry.all() {
            let length = self.queue_length(&backend.name);
            if best.as_ref().map_or(true, |(_, min)| length < *min) {
                best = Some((backend, length));
            }
        }
        best.map(|(backend, _)| backend)
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn admission_timeout(&self) -> Option<Duration> {
        self.admission_timeout
    }

    /// Name of the active scheduling strategy.
    pub fn strategy(&self) -> &str {
        self.scheduler.name()
    }
}

/// A reserved slot on a backend.
pub struct Reservation {
    backend: Arc<Backend>,
    scheduler: Arc<dyn Scheduler>,
    released: bool,
}

impl Reservation {
    /// The backend this request was scheduled on.
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Release the slot, reporting whether the request succeeded.
    pub fn release(mut self, ok: bool) -> Result<(), SchedulerError> {
        self.released = true;
        self.scheduler.dequeue(&self.backend.name, ok)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::debug!("Reservation on {} dropped, releasing as failed", self.backend.name);
        if let Err(e) = self.scheduler.dequeue(&self.backend.name, false) {
            tracing::error!("Slot accounting error on backend {}: {}", self.backend.name, e);
        }
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("backend", &self.backend.name)
            .field("released", &self.released)
            .finish()
    }
}
