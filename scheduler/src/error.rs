//! Error types for the scheduling engine.

use std::time::Duration;

use thiserror::Error;

/// Errors from slot reservation and scheduling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Capacity never freed up within the caller's bound.
    #[error("No backend available within {0:?}")]
    AdmissionTimeout(Duration),

    /// A slot was released without a matching reservation.
    ///
    /// This means slot accounting has drifted and must not be masked.
    #[error("Release on backend '{0}' without a matching reservation")]
    NotReserved(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
