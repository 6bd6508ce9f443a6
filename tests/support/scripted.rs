//! In-memory transport driven step by step from a test, plus a sink that
//! records how it was used.

use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use webdav_core::transport::{
    AuthChallenge, Credentials, FailureCause, Method, Request, RequestBody, RequestHandle,
    Transport, TransportEvent, TransportEvents, TransportFailure,
};

/// What the client handed to the transport.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub handle: RequestHandle,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// In-memory body, if any.
    pub body: Option<Bytes>,
    pub streamed: bool,
    /// Credentials to send before any challenge.
    pub credentials: Option<Credentials>,
}

impl Submitted {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Default)]
struct State {
    submitted: Vec<Submitted>,
    events: HashMap<RequestHandle, TransportEvents>,
    buffers: HashMap<RequestHandle, BytesMut>,
    terminal: HashSet<RequestHandle>,
    aborted: Vec<RequestHandle>,
    released: Vec<RequestHandle>,
}

/// A transport that does nothing until the test tells it what happened.
///
/// Like a real transport it posts at most one terminal event per handle.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, handle: RequestHandle, event: TransportEvent) {
        let events = self.lock().events.get(&handle).cloned();
        if let Some(events) = events {
            events.post(event);
        }
    }

    fn claim_terminal(&self, handle: RequestHandle) -> bool {
        self.lock().terminal.insert(handle)
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.lock().submitted.clone()
    }

    pub fn last_submitted(&self) -> Submitted {
        self.submitted().pop().unwrap()
    }

    pub fn aborted(&self) -> Vec<RequestHandle> {
        self.lock().aborted.clone()
    }

    pub fn released(&self) -> Vec<RequestHandle> {
        self.lock().released.clone()
    }

    pub fn headers(&self, handle: RequestHandle, status: StatusCode) {
        self.post(handle, TransportEvent::ResponseHeaders { handle, status });
    }

    /// Buffers `data` without signalling.
    pub fn buffer(&self, handle: RequestHandle, data: &[u8]) {
        self.lock()
            .buffers
            .entry(handle)
            .or_default()
            .extend_from_slice(data);
    }

    /// Buffers `data` and signals that it is available.
    pub fn data(&self, handle: RequestHandle, data: &[u8]) {
        self.buffer(handle, data);
        self.post(handle, TransportEvent::DataAvailable { handle });
    }

    pub fn challenge(
        &self,
        handle: RequestHandle,
        realm: Option<&str>,
    ) -> oneshot::Receiver<Option<Credentials>> {
        let (challenge, answer) = AuthChallenge::new(realm.map(str::to_string));
        self.post(
            handle,
            TransportEvent::AuthenticationRequired { handle, challenge },
        );
        answer
    }

    pub fn complete(&self, handle: RequestHandle, status: StatusCode) {
        if self.claim_terminal(handle) {
            self.post(handle, TransportEvent::Completed { handle, status });
        }
    }

    pub fn fail(&self, handle: RequestHandle, failure: TransportFailure) {
        if self.claim_terminal(handle) {
            self.post(
                handle,
                TransportEvent::Failed {
                    handle,
                    cause: FailureCause::Error(failure),
                },
            );
        }
    }

    /// Waits until the client released `handle`.
    pub async fn wait_released(&self, handle: RequestHandle) {
        for _ in 0..200 {
            if self.released().contains(&handle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("request {handle} was never released");
    }
}

impl Transport for ScriptedTransport {
    fn submit(&self, handle: RequestHandle, request: Request, events: TransportEvents) {
        let (body, streamed) = match request.body {
            RequestBody::Empty => (None, false),
            RequestBody::Bytes(bytes) => (Some(bytes), false),
            RequestBody::Stream { .. } => (None, true),
        };
        let mut state = self.lock();
        state.submitted.push(Submitted {
            handle,
            method: request.method,
            url: request.url.to_string(),
            headers: request.headers,
            body,
            streamed,
            credentials: request.credentials,
        });
        state.events.insert(handle, events);
    }

    fn read_all(&self, handle: RequestHandle) -> Bytes {
        self.lock()
            .buffers
            .get_mut(&handle)
            .map(|buffer| buffer.split().freeze())
            .unwrap_or_default()
    }

    fn abort(&self, handle: RequestHandle) {
        self.lock().aborted.push(handle);
        if self.claim_terminal(handle) {
            self.post(
                handle,
                TransportEvent::Failed {
                    handle,
                    cause: FailureCause::Cancelled,
                },
            );
        }
    }

    fn release(&self, handle: RequestHandle) {
        let mut state = self.lock();
        state.released.push(handle);
        state.events.remove(&handle);
        state.buffers.remove(&handle);
    }
}

#[derive(Debug, Default)]
pub struct SinkRecord {
    pub data: Vec<u8>,
    pub flushed: bool,
    pub shutdown: bool,
    pub dropped: bool,
}

/// Shared view of a [`RecordingSink`] that outlives it.
#[derive(Debug, Clone, Default)]
pub struct SinkProbe(Arc<Mutex<SinkRecord>>);

impl SinkProbe {
    fn lock(&self) -> MutexGuard<'_, SinkRecord> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn data(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    pub fn flushed(&self) -> bool {
        self.lock().flushed
    }

    pub fn shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn dropped(&self) -> bool {
        self.lock().dropped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkMode {
    Normal,
    /// Every write fails.
    Failing,
    /// Writes never complete.
    StalledWrite,
    /// Writes succeed, flushes never complete.
    StalledFlush,
}

/// An `AsyncWrite` that records writes, flushes, shutdown and drop.
pub struct RecordingSink {
    probe: SinkProbe,
    mode: SinkMode,
}

impl RecordingSink {
    pub fn new() -> (Self, SinkProbe) {
        Self::with_mode(SinkMode::Normal)
    }

    /// A sink whose every write fails.
    pub fn failing() -> (Self, SinkProbe) {
        Self::with_mode(SinkMode::Failing)
    }

    /// A sink whose writes stay pending forever, like a pipe nobody reads.
    pub fn stalled() -> (Self, SinkProbe) {
        Self::with_mode(SinkMode::StalledWrite)
    }

    /// A sink that accepts writes but never finishes a flush.
    pub fn stalled_flush() -> (Self, SinkProbe) {
        Self::with_mode(SinkMode::StalledFlush)
    }

    fn with_mode(mode: SinkMode) -> (Self, SinkProbe) {
        let probe = SinkProbe::default();
        (
            Self {
                probe: probe.clone(),
                mode,
            },
            probe,
        )
    }
}

impl AsyncWrite for RecordingSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.mode {
            SinkMode::Failing => Poll::Ready(Err(io::Error::other("disk full"))),
            SinkMode::StalledWrite => Poll::Pending,
            SinkMode::Normal | SinkMode::StalledFlush => {
                self.probe.lock().data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.mode == SinkMode::StalledFlush {
            return Poll::Pending;
        }
        self.probe.lock().flushed = true;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.probe.lock().shutdown = true;
        Poll::Ready(Ok(()))
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.probe.lock().dropped = true;
    }
}
