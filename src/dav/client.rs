//! The WebDAV client: public operations and their replies.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument, warn};

use super::config::ConnectionConfig;
use super::dispatcher::{Dispatcher, Inbound, Message, Registration};
use super::error::DavError;
use super::request;
use crate::transport::{Method, Request, RequestHandle, Transport, TransportEvents};

/// Buffered error events per subscriber before the slowest one starts lagging.
const ERROR_EVENT_CAPACITY: usize = 64;

/// A non-cancellation failure, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub handle: RequestHandle,
    pub description: String,
}

/// A successfully finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Final HTTP status.
    pub status: StatusCode,
    /// Response body bytes delivered to the sink or collector.
    pub bytes_received: u64,
    /// The response body, when no sink was bound.
    pub body: Option<Bytes>,
}

/// How a request ended. Exactly one per request.
#[derive(Debug)]
pub enum Outcome {
    Completed(Completion),
    Failed(DavError),
    /// Cancelled through [`WebDavClient::cancel`]. Never reported as an error.
    Cancelled,
}

impl Outcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

/// Handle to a submitted request. Returned immediately by every operation.
#[must_use = "a Reply does nothing unless awaited; drop it explicitly to fire and forget"]
#[derive(Debug)]
pub struct Reply {
    handle: RequestHandle,
    outcome: oneshot::Receiver<Outcome>,
}

impl Reply {
    #[must_use]
    pub fn handle(&self) -> RequestHandle {
        self.handle
    }

    /// Waits for the request to end.
    pub async fn finished(self) -> Outcome {
        let handle = self.handle;
        self.outcome
            .await
            .unwrap_or_else(|_| Outcome::Failed(DavError::DispatcherClosed { handle }))
    }

    /// Waits for the request to end, treating cancellation as an error.
    ///
    /// # Errors
    ///
    /// Returns the request's [`DavError`], or [`DavError::Cancelled`] if it
    /// was cancelled.
    pub async fn completed(self) -> Result<Completion, DavError> {
        let handle = self.handle;
        match self.finished().await {
            Outcome::Completed(completion) => Ok(completion),
            Outcome::Failed(error) => Err(error),
            Outcome::Cancelled => Err(DavError::Cancelled { handle }),
        }
    }
}

/// Asynchronous WebDAV client.
///
/// Every operation returns a [`Reply`] right away; the request runs in the
/// background. Non-cancellation failures are also broadcast to
/// [`subscribe`](Self::subscribe)rs. The client stays usable after any failure.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use webdav_core::dav::{ConnectionConfig, Scheme, WebDavClient};
/// use webdav_core::transport::{HttpTransport, TransportConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let transport = Arc::new(HttpTransport::new(TransportConfig::default())?);
/// let config = ConnectionConfig::new(Scheme::Https, "dav.example.com")?
///     .credentials("alice", "secret");
/// let client = WebDavClient::new(transport, config);
///
/// client.store("/test", "hello, world!!!")?.completed().await?;
/// let fetched = client.fetch("/test")?.completed().await?;
/// assert_eq!(fetched.body.as_deref(), Some(&b"hello, world!!!"[..]));
/// # Ok(())
/// # }
/// ```
pub struct WebDavClient {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    dispatch: mpsc::UnboundedSender<Message>,
    events: TransportEvents,
    errors: broadcast::Sender<ErrorEvent>,
    next_handle: AtomicU64,
}

impl WebDavClient {
    /// Creates a client and starts its dispatcher task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        let (dispatch, queue) = mpsc::unbounded_channel();
        let (errors, _) = broadcast::channel(ERROR_EVENT_CAPACITY);
        Dispatcher::spawn(Arc::clone(&transport), errors.clone(), &dispatch, queue);

        let forward = dispatch.clone();
        let events = TransportEvents::new(move |event| {
            // Only fails once the dispatcher is gone.
            let _ = forward.send(Message::Transport(event));
        });

        debug!(base_url = %config.base_url(), "WebDAV client created");
        Self {
            config,
            transport,
            dispatch,
            events,
            errors,
            next_handle: AtomicU64::new(0),
        }
    }

    /// Replaces the whole connection configuration. Requests already in
    /// flight keep the settings they were submitted with.
    pub fn configure(&mut self, config: ConnectionConfig) {
        debug!(base_url = %config.base_url(), "WebDAV client reconfigured");
        self.config = config;
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Receives every non-cancellation failure from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    /// Fetches `path` and collects the body in memory.
    ///
    /// # Errors
    ///
    /// Currently infallible. Operations that can reject their input return
    /// [`DavError::InvalidHeader`]; the rest share the signature.
    #[instrument(skip(self), fields(path = %path))]
    pub fn fetch(&self, path: &str) -> Result<Reply, DavError> {
        let request = request::fetch(&self.config, path, 0)?;
        Ok(self.submit(request, Inbound::Collect(BytesMut::new()), None, 0))
    }

    /// Fetches `path`, streaming the body into `sink`. The sink is flushed and
    /// shut down when the request ends, or dropped unflushed on cancellation.
    ///
    /// # Errors
    ///
    /// Currently infallible, see [`fetch`](Self::fetch).
    #[instrument(skip(self, sink), fields(path = %path))]
    pub fn fetch_into(
        &self,
        path: &str,
        sink: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Result<Reply, DavError> {
        self.fetch_range(path, sink, 0)
    }

    /// Fetches `path` from `from_byte` onwards into `sink`. A non-zero offset
    /// sends `Range: bytes=<from_byte>-` and requires a `206` answer.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::InvalidHeader`] if the range header cannot be built.
    #[instrument(skip(self, sink), fields(path = %path))]
    pub fn fetch_range(
        &self,
        path: &str,
        sink: impl AsyncWrite + Send + Unpin + 'static,
        from_byte: u64,
    ) -> Result<Reply, DavError> {
        let request = request::fetch(&self.config, path, from_byte)?;
        Ok(self.submit(request, Inbound::Sink(Box::new(sink)), None, from_byte))
    }

    /// Stores `body` at `path`.
    ///
    /// # Errors
    ///
    /// Currently infallible, see [`fetch`](Self::fetch).
    #[instrument(skip(self, body), fields(path = %path))]
    pub fn store(&self, path: &str, body: impl Into<Bytes>) -> Result<Reply, DavError> {
        let body = body.into();
        let request = request::store(&self.config, path, body.clone());
        Ok(self.submit(request, Inbound::Collect(BytesMut::new()), Some(body), 0))
    }

    /// Stores the contents of `reader` at `path`. Pass `length` when known so
    /// `Content-Length` is sent.
    ///
    /// A streamed body cannot be resent after an authentication challenge, so
    /// configured credentials go out with the first attempt.
    ///
    /// # Errors
    ///
    /// Currently infallible, see [`fetch`](Self::fetch).
    #[instrument(skip(self, reader), fields(path = %path))]
    pub fn store_from(
        &self,
        path: &str,
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        length: Option<u64>,
    ) -> Result<Reply, DavError> {
        let request = request::store_from(&self.config, path, Box::new(reader), length);
        Ok(self.submit(request, Inbound::Collect(BytesMut::new()), None, 0))
    }

    /// Creates the collection at `path`.
    ///
    /// # Errors
    ///
    /// Currently infallible, see [`fetch`](Self::fetch).
    #[instrument(skip(self), fields(path = %path))]
    pub fn create_collection(&self, path: &str) -> Result<Reply, DavError> {
        let request = request::create_collection(&self.config, path);
        Ok(self.submit(request, Inbound::Collect(BytesMut::new()), None, 0))
    }

    /// Copies `from` to `to`, recursively.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::InvalidHeader`] if the destination URL is not a
    /// valid header value.
    #[instrument(skip(self))]
    pub fn copy(&self, from: &str, to: &str, overwrite: bool) -> Result<Reply, DavError> {
        let request = request::transfer(&self.config, Method::Copy, from, to, overwrite)?;
        Ok(self.submit(request, Inbound::Collect(BytesMut::new()), None, 0))
    }

    /// Moves `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::InvalidHeader`] if the destination URL is not a
    /// valid header value.
    #[instrument(skip(self))]
    pub fn move_to(&self, from: &str, to: &str, overwrite: bool) -> Result<Reply, DavError> {
        let request = request::transfer(&self.config, Method::Move, from, to, overwrite)?;
        Ok(self.submit(request, Inbound::Collect(BytesMut::new()), None, 0))
    }

    /// Deletes `path`.
    ///
    /// # Errors
    ///
    /// Currently infallible, see [`fetch`](Self::fetch).
    #[instrument(skip(self), fields(path = %path))]
    pub fn remove(&self, path: &str) -> Result<Reply, DavError> {
        let request = request::remove(&self.config, path);
        Ok(self.submit(request, Inbound::Collect(BytesMut::new()), None, 0))
    }

    /// Sends an arbitrary method, e.g. `PROPFIND`. A non-empty body goes out as
    /// `text/xml; charset=utf-8`; the response body is collected.
    ///
    /// # Errors
    ///
    /// Currently infallible, see [`fetch`](Self::fetch).
    #[instrument(skip(self, body), fields(method = %method, path = %path))]
    pub fn send_custom(
        &self,
        method: &str,
        path: &str,
        body: impl Into<Bytes>,
    ) -> Result<Reply, DavError> {
        let body = body.into();
        let request = request::custom(&self.config, method, path, body.clone());
        let outbound = (!body.is_empty()).then_some(body);
        Ok(self.submit(request, Inbound::Collect(BytesMut::new()), outbound, 0))
    }

    /// Cancels the request. Its reply resolves to [`Outcome::Cancelled`] and
    /// no error event is published. A sink still being flushed after the
    /// transport finished is dropped unflushed. Does nothing once the reply
    /// has resolved.
    pub fn cancel(&self, handle: RequestHandle) {
        debug!(%handle, "cancelling request");
        self.transport.abort(handle);
        let _ = self.dispatch.send(Message::Cancel(handle));
    }

    fn allocate_handle(&self) -> RequestHandle {
        RequestHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn submit(
        &self,
        request: Request,
        inbound: Inbound,
        outbound: Option<Bytes>,
        range_from: u64,
    ) -> Reply {
        let handle = self.allocate_handle();
        let (done, outcome) = oneshot::channel();
        let registration = Registration {
            handle,
            url: request.url.to_string(),
            inbound,
            outbound,
            range_from,
            credentials: self.config.auth_credentials().clone(),
            done,
        };

        // Registration goes first so the dispatcher knows the handle before
        // the transport can post anything for it.
        if self.dispatch.send(Message::Register(registration)).is_err() {
            warn!(%handle, "dispatcher gone, request not submitted");
            return Reply { handle, outcome };
        }
        debug!(%handle, method = %request.method, url = %request.url, "submitting request");
        self.transport.submit(handle, request, self.events.clone());
        Reply { handle, outcome }
    }
}

impl std::fmt::Debug for WebDavClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavClient")
            .field("config", &self.config)
            .field("next_handle", &self.next_handle)
            .finish_non_exhaustive()
    }
}
