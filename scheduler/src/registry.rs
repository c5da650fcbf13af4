//! Backend registry holding configured backends and their affinity state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::backend::{Backend, BackendUsage};

/// Errors from registry mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Backend '{0}' is already registered")]
    DuplicateBackend(String),
}

struct Entry {
    backend: Arc<Backend>,
    usage: Mutex<BackendUsage>,
}

impl Entry {
    fn new(backend: Backend) -> Self {
        Self {
            backend: Arc::new(backend),
            usage: Mutex::new(BackendUsage::default()),
        }
    }
}

/// Ordered table of backends.
///
/// Order is significant: it is the iteration order and the tie-break order
/// for scheduling.
pub struct BackendRegistry {
    entries: RwLock<Vec<Arc<Entry>>>,
}

impl BackendRegistry {
    /// Create a registry from backends in configuration order.
    pub fn new(backends: impl IntoIterator<Item = Backend>) -> Result<Self, RegistryError> {
        let registry = Self {
            entries: RwLock::new(Vec::new()),
        };
        for backend in backends {
            registry.add(backend)?;
        }
        Ok(registry)
    }

    /// Append a backend. Names must be unique.
    pub fn add(&self, backend: Backend) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.backend.name == backend.name) {
            return Err(RegistryError::DuplicateBackend(backend.name));
        }
        tracing::debug!("Registered backend {} at {}", backend.name, backend.url);
        entries.push(Arc::new(Entry::new(backend)));
        Ok(())
    }

    /// Remove a backend from scheduling.
    pub fn remove(&self, name: &str) -> Option<Arc<Backend>> {
        let mut entries = self.entries.write();
        let idx = entries.iter().position(|e| e.backend.name == name)?;
        Some(entries.remove(idx).backend.clone())
    }

    /// Get a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<Backend>> {
        self.entry(name).map(|e| e.backend.clone())
    }

    /// All backends in configuration order.
    pub fn all(&self) -> Vec<Arc<Backend>> {
        self.entries.read().iter().map(|e| e.backend.clone()).collect()
    }

    /// Names of all backends in configuration order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.backend.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Backends allowed to serve `model`, in configuration order.
    ///
    /// With no model every backend is eligible.
    pub fn filter_eligible(&self, model: Option<&str>) -> Vec<Arc<Backend>> {
        let entries = self.entries.read();
        match model.filter(|m| !m.is_empty()) {
            Some(model) => entries
                .iter()
                .filter(|e| e.backend.accepts(model))
                .map(|e| e.backend.clone())
                .collect(),
            None => entries.iter().map(|e| e.backend.clone()).collect(),
        }
    }

    /// Snapshot of a backend's affinity annotation.
    pub fn usage(&self, name: &str) -> Option<BackendUsage> {
        self.entry(name).map(|e| e.usage.lock().clone())
    }

    /// Eligible backends paired with their usage, in configuration order.
    pub fn eligible_with_usage(&self, model: Option<&str>) -> Vec<(Arc<Backend>, BackendUsage)> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| model.map_or(true, |m| m.is_empty() || e.backend.accepts(m)))
            .map(|e| (e.backend.clone(), e.usage.lock().clone()))
            .collect()
    }

    /// Record that a request for `model` was scheduled on `name`.
    ///
    /// The load timestamp is left untouched; only completions refresh it.
    pub fn mark_scheduled(&self, name: &str, model: Option<&str>) {
        if let Some(entry) = self.entry(name) {
            entry.usage.lock().last_model = model.map(str::to_string);
        }
    }

    /// Record the outcome of a completed request.
    ///
    /// Only successful completions refresh affinity and liveness.
    pub fn record_completion(&self, name: &str, model: Option<&str>, ok: bool) {
        self.record_completion_at(name, model, ok, Utc::now());
    }

    /// Same as [`record_completion`](Self::record_completion) with an explicit timestamp.
    pub fn record_completion_at(
        &self,
        name: &str,
        model: Option<&str>,
        ok: bool,
        at: DateTime<Utc>,
    ) {
        if !ok {
            return;
        }
        let Some(entry) = self.entry(name) else {
            tracing::warn!("Completion recorded for unknown backend {}", name);
            return;
        };
        let mut usage = entry.usage.lock();
        usage.last_seen = Some(at);
        usage.last_model = model.map(str::to_string);
        usage.last_model_at = Some(at);
    }

    fn entry(&self, name: &str) -> Option<Arc<Entry>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.backend.name == name)
            .cloned()
    }
}
