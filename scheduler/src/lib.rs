//! Ollama Proxy Scheduler
//!
//! Admission control and backend selection for the proxy:
//! - Backend registry with model whitelist/blacklist and affinity state
//! - Bounded per-backend slot queues
//! - Shortest-queue and model-affinity scheduling strategies
//! - Dispatch coordination with guaranteed slot release

pub mod affinity;
pub mod backend;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod shortest_queue;
pub mod slots;
pub mod traits;

pub use affinity::{ModelAffinityScheduler, DEFAULT_AFFINITY_WINDOW};
pub use backend::{Backend, BackendUsage, ScheduleFilter};
pub use dispatch::{DispatchError, Dispatcher, Reservation};
pub use error::SchedulerError;
pub use registry::{BackendRegistry, RegistryError};
pub use shortest_queue::{ShortestQueueScheduler, RETRY_INTERVAL};
pub use slots::{SlotQueue, DEFAULT_CAPACITY};
pub use traits::Scheduler;
