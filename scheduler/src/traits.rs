//! Scheduler trait definition.
//!
//! All scheduling strategies implement [`Scheduler`]. A successful
//! [`enqueue`](Scheduler::enqueue) holds one slot on the returned backend
//! until the matching [`dequeue`](Scheduler::dequeue).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{Backend, ScheduleFilter};
use crate::error::Result;

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Wait for a backend able to take the request and reserve a slot on it.
    ///
    /// Returns `Ok(None)` when no backend is eligible at all. `timeout` of
    /// `None` waits without bound.
    async fn enqueue(
        &self,
        filter: &ScheduleFilter,
        timeout: Option<Duration>,
    ) -> Result<Option<Arc<Backend>>>;

    /// Release the slot taken by a previous `enqueue` on `name`.
    ///
    /// `ok` reports whether the forwarded request succeeded.
    fn dequeue(&self, name: &str, ok: bool) -> Result<()>;

    /// Number of reserved slots on `name`.
    fn get_length(&self, name: &str) -> usize;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}
