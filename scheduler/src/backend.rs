//! Backend descriptors and the per-request scheduling filter.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A configured backend server.
///
/// Descriptors are immutable for the lifetime of the process; the mutable
/// affinity annotation lives in [`BackendUsage`], owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Unique backend name (config section name).
    pub name: String,
    /// Base URL requests are forwarded to (e.g., "http://localhost:11434").
    pub url: String,
    /// Models allowed on this backend. Empty means no restriction.
    pub model_whitelist: Vec<String>,
    /// Models refused by this backend. Ignored for whitelisted models.
    pub model_blacklist: Vec<String>,
}

impl Backend {
    /// Create a backend without model restrictions.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            model_whitelist: Vec::new(),
            model_blacklist: Vec::new(),
        }
    }

    /// Set the model whitelist.
    pub fn with_whitelist<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_whitelist = models.into_iter().map(Into::into).collect();
        self
    }

    /// Set the model blacklist.
    pub fn with_blacklist<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_blacklist = models.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether this backend may serve `model`.
    ///
    /// A non-empty whitelist is exclusive and wins over the blacklist.
    pub fn accepts(&self, model: &str) -> bool {
        if !self.model_whitelist.is_empty() {
            return self.model_whitelist.iter().any(|m| m == model);
        }
        !self.model_blacklist.iter().any(|m| m == model)
    }
}

/// Affinity and liveness annotation of a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendUsage {
    /// Model most recently scheduled or completed here.
    pub last_model: Option<String>,
    /// When `last_model` last completed successfully. `None` means never.
    pub last_model_at: Option<DateTime<Utc>>,
    /// Last successful completion of any request.
    pub last_seen: Option<DateTime<Utc>>,
}

impl BackendUsage {
    /// Whether `model` is considered still resident on this backend.
    ///
    /// True only when `model` is the last one loaded here and more than
    /// `window` has passed since it last completed.
    pub fn is_affinity_hot(
        &self,
        model: &str,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match (&self.last_model, self.last_model_at) {
            (Some(last), Some(at)) => {
                last == model && at.checked_add_signed(window).map_or(false, |warm| now > warm)
            }
            _ => false,
        }
    }
}

/// Per-request scheduling hints.
///
/// Unknown keys are ignored, so a filter can be read directly from an
/// inference request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScheduleFilter {
    /// Requested model.
    #[serde(default)]
    pub model: Option<String>,
}

impl ScheduleFilter {
    /// Filter for a specific model.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
        }
    }

    /// The requested model, treating an empty string as absent.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }
}
