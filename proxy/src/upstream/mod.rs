//! Forwarding to backend servers.

pub mod client;
pub mod stream;

pub use client::{response_headers, UpstreamClient, UpstreamError};
pub use stream::{Completion, ReleasingStream};
