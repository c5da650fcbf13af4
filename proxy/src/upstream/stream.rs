//! Response body stream that owns the request's backend reservation.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};

use ollama_proxy_scheduler::{Dispatcher, Reservation};

use crate::access_log::{AccessEvent, AccessLog};

/// What to do once the response body is finished.
pub struct Completion {
    pub reservation: Reservation,
    /// Outcome reported if the body ends cleanly.
    pub ok: bool,
    pub access: AccessLog,
    pub dispatcher: Arc<Dispatcher>,
}

impl Completion {
    fn finish(self, ok: bool, error: Option<&str>) {
        let server = self.reservation.backend().name.clone();
        if let Err(e) = self.reservation.release(ok) {
            tracing::error!("Slot accounting error on backend {}: {}", server, e);
        }
        let queued = self.dispatcher.queue_length(&server) as i64;
        self.access.log(AccessEvent::GenDone, Some(&server), queued, error);
    }
}

/// Backend body stream releasing its reservation exactly once: when the body
/// ends, when it fails, or when the client goes away and the stream is dropped.
pub struct ReleasingStream {
    inner: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    completion: Option<Completion>,
}

impl ReleasingStream {
    pub fn new<S>(inner: S, completion: Completion) -> Self
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            inner: inner.boxed(),
            completion: Some(completion),
        }
    }

    fn finish(&mut self, ok: Option<bool>, error: Option<&str>) {
        if let Some(completion) = self.completion.take() {
            let ok = ok.unwrap_or(completion.ok);
            completion.finish(ok, error);
        }
    }
}

impl Stream for ReleasingStream {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.finish(Some(false), Some(&e.to_string()));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(None, None);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for ReleasingStream {
    fn drop(&mut self) {
        self.finish(Some(false), Some("response dropped before completion"));
    }
}
