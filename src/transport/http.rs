//! `reqwest`-backed transport.
//!
//! Each submitted request runs in its own Tokio task. Response bytes are
//! buffered per request; when the buffer crosses the read threshold the task
//! posts `DataAvailable` and the core drains it with `read_all`. Once four
//! thresholds' worth of bytes sit undrained the task stops reading from the
//! network until the core catches up, so a slow sink never turns into an
//! unbounded buffer.
//!
//! A `401` answer becomes an `AuthenticationRequired` event. When the event is
//! answered the request is resent with basic credentials, and credentials the
//! server accepts are cached per origin so later requests send them up front.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use super::constants::{
    CONNECT_TIMEOUT_SECS, HIGH_WATER_FACTOR, READ_THRESHOLD_BYTES, READ_TIMEOUT_SECS,
    UPLOAD_CHUNK_BYTES,
};
use super::{
    AuthChallenge, Credentials, FailureCause, Request, RequestBody, RequestHandle, Transport,
    TransportEvent, TransportEvents, TransportFailure,
};
use crate::user_agent;

/// Tunables for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub read_timeout: Duration,
    /// Buffered bytes that trigger a data-available event.
    pub read_threshold: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            read_threshold: READ_THRESHOLD_BYTES,
        }
    }
}

/// HTTP transport built on a pooled `reqwest::Client`.
///
/// Create it once and share it; cloning is cheap and clones share in-flight
/// state and the credential cache.
///
/// # Example
///
/// ```no_run
/// use webdav_core::transport::{HttpTransport, TransportConfig};
///
/// # fn example() -> Result<(), reqwest::Error> {
/// let transport = HttpTransport::new(TransportConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    exchanges: DashMap<RequestHandle, Arc<Exchange>>,
    /// Accepted credentials keyed by origin (`scheme://host:port`).
    credentials: DashMap<String, Credentials>,
    read_threshold: usize,
}

/// Per-request state shared between the request task and the core.
#[derive(Debug)]
struct Exchange {
    events: TransportEvents,
    buffer: Mutex<BytesMut>,
    /// A `DataAvailable` was posted and the buffer has not been drained since.
    signalled: AtomicBool,
    drained: Notify,
    /// Set by whoever posts the terminal event.
    terminal: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Exchange {
    fn new(events: TransportEvents) -> Self {
        Self {
            events,
            buffer: Mutex::new(BytesMut::new()),
            signalled: AtomicBool::new(false),
            drained: Notify::new(),
            terminal: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    fn push(&self, chunk: &[u8]) -> usize {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend_from_slice(chunk);
        buffer.len()
    }

    fn buffered(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take(&self) -> Bytes {
        let data = self
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .split()
            .freeze();
        self.signalled.store(false, Ordering::SeqCst);
        self.drained.notify_one();
        data
    }

    /// Returns true when no `DataAvailable` is outstanding.
    fn mark_signalled(&self) -> bool {
        !self.signalled.swap(true, Ordering::SeqCst)
    }

    /// Returns true for exactly one caller: the one allowed to post the
    /// terminal event.
    fn claim_terminal(&self) -> bool {
        !self.terminal.swap(true, Ordering::SeqCst)
    }

    fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    fn set_task(&self, task: JoinHandle<()>) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_terminal() {
            // Aborted between spawn and here.
            task.abort();
        } else {
            *slot = Some(task);
        }
    }

    fn abort_task(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl HttpTransport {
    /// Creates a transport with the given timeouts and read threshold.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the client cannot be built (for example
    /// when the TLS backend fails to initialise).
    #[instrument(level = "debug")]
    pub fn new(config: TransportConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self {
            client,
            shared: Arc::new(Shared {
                exchanges: DashMap::new(),
                credentials: DashMap::new(),
                read_threshold: config.read_threshold.max(1),
            }),
        })
    }

    /// Number of requests whose state has not been released yet.
    #[must_use]
    pub fn tracked_requests(&self) -> usize {
        self.shared.exchanges.len()
    }

    fn exchange(&self, handle: RequestHandle) -> Option<Arc<Exchange>> {
        self.shared
            .exchanges
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl Transport for HttpTransport {
    fn submit(&self, handle: RequestHandle, request: Request, events: TransportEvents) {
        let exchange = Arc::new(Exchange::new(events));
        self.shared.exchanges.insert(handle, Arc::clone(&exchange));

        let client = self.client.clone();
        let shared = Arc::clone(&self.shared);
        let task_exchange = Arc::clone(&exchange);
        let task = tokio::spawn(async move {
            let exchange = task_exchange;
            let event = match shared.execute(&client, handle, &exchange, request).await {
                Ok(status) => TransportEvent::Completed { handle, status },
                Err(failure) => {
                    debug!(%handle, error = %failure, "request failed");
                    TransportEvent::Failed {
                        handle,
                        cause: FailureCause::Error(failure),
                    }
                }
            };
            if exchange.claim_terminal() {
                exchange.events.post(event);
            }
        });
        exchange.set_task(task);
    }

    fn read_all(&self, handle: RequestHandle) -> Bytes {
        self.exchange(handle)
            .map(|exchange| exchange.take())
            .unwrap_or_default()
    }

    fn abort(&self, handle: RequestHandle) {
        let Some(exchange) = self.exchange(handle) else {
            return;
        };
        if exchange.claim_terminal() {
            debug!(%handle, "aborting request");
            exchange.abort_task();
            exchange.events.post(TransportEvent::Failed {
                handle,
                cause: FailureCause::Cancelled,
            });
        }
    }

    fn release(&self, handle: RequestHandle) {
        if let Some((_, exchange)) = self.shared.exchanges.remove(&handle) {
            // Terminal already posted; a still-running task has nothing left to report.
            exchange.abort_task();
            trace!(%handle, "released transport state");
        }
    }
}

impl Shared {
    /// Runs one exchange to its terminal state, resending once per answered
    /// challenge.
    async fn execute(
        &self,
        client: &Client,
        handle: RequestHandle,
        exchange: &Exchange,
        request: Request,
    ) -> Result<StatusCode, TransportFailure> {
        let Request {
            method,
            url,
            headers,
            body,
            credentials: preemptive,
        } = request;
        let url_text = url.to_string();
        let http_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|_| {
            TransportFailure::invalid_request(&url_text, format!("invalid method token {method}"))
        })?;
        let origin = url.origin().ascii_serialization();
        let mut body = ReplayableBody::from(body);
        let mut credentials = preemptive.or_else(|| {
            self.credentials
                .get(&origin)
                .map(|entry| entry.value().clone())
        });

        loop {
            let builder = client
                .request(http_method.clone(), url.clone())
                .headers(headers.clone());
            let builder = match &credentials {
                Some(c) => builder.basic_auth(c.username(), Some(c.password())),
                None => builder,
            };
            let Some(builder) = body.attach(builder) else {
                return Err(TransportFailure::body_not_replayable(&url_text));
            };

            debug!(%handle, method = %method, url = %url_text, authenticated = credentials.is_some(), "sending request");
            let response = builder
                .send()
                .await
                .map_err(|e| TransportFailure::from_reqwest(&url_text, &e))?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if credentials.is_some() {
                    self.credentials.remove(&origin);
                }
                let realm = parse_realm(response.headers());
                drop(response);
                if exchange.is_terminal() {
                    return Err(TransportFailure::unauthorized(&url_text));
                }
                if body.is_spent() {
                    // Nothing left to resend: credentials that went out with
                    // the stream were refused, or there were none.
                    return Err(if credentials.is_some() {
                        TransportFailure::unauthorized(&url_text)
                    } else {
                        TransportFailure::body_not_replayable(&url_text)
                    });
                }

                let (challenge, answer) = AuthChallenge::new(realm);
                exchange
                    .events
                    .post(TransportEvent::AuthenticationRequired { handle, challenge });
                match answer.await {
                    Ok(Some(supplied)) => {
                        credentials = Some(supplied);
                        continue;
                    }
                    _ => return Err(TransportFailure::unauthorized(&url_text)),
                }
            }

            if let Some(accepted) = &credentials {
                self.credentials.insert(origin.clone(), accepted.clone());
            }

            exchange
                .events
                .post(TransportEvent::ResponseHeaders { handle, status });
            if !status.is_success() {
                return Err(TransportFailure::status(&url_text, status));
            }

            self.stream_body(handle, exchange, response, &url_text)
                .await?;
            return Ok(status);
        }
    }

    /// Buffers the response body, signalling the core at the read threshold
    /// and pausing at the high-water mark.
    async fn stream_body(
        &self,
        handle: RequestHandle,
        exchange: &Exchange,
        response: reqwest::Response,
        url: &str,
    ) -> Result<(), TransportFailure> {
        let high_water = self.read_threshold.saturating_mul(HIGH_WATER_FACTOR);
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| TransportFailure::from_reqwest(url, &e))?;
            let buffered = exchange.push(&chunk);

            if buffered >= self.read_threshold && exchange.mark_signalled() {
                trace!(%handle, buffered, "data available");
                exchange
                    .events
                    .post(TransportEvent::DataAvailable { handle });
            }

            while exchange.buffered() >= high_water {
                if exchange.is_terminal() {
                    return Ok(());
                }
                trace!(%handle, "buffer at high-water mark, waiting for drain");
                exchange.drained.notified().await;
            }
        }

        Ok(())
    }
}

/// Request body in a form that can be attached to successive attempts.
enum ReplayableBody {
    Empty,
    Bytes(Bytes),
    /// `None` once the stream was handed to an attempt.
    Stream(Option<Box<dyn AsyncRead + Send + Sync + Unpin>>),
}

impl From<RequestBody> for ReplayableBody {
    fn from(body: RequestBody) -> Self {
        match body {
            RequestBody::Empty => Self::Empty,
            RequestBody::Bytes(bytes) => Self::Bytes(bytes),
            RequestBody::Stream { reader, .. } => Self::Stream(Some(reader)),
        }
    }
}

impl ReplayableBody {
    /// True once a streamed body went out with an earlier attempt.
    fn is_spent(&self) -> bool {
        matches!(self, Self::Stream(None))
    }

    /// Attaches the body to `builder`. Returns `None` when a streamed body was
    /// already consumed by an earlier attempt.
    fn attach(&mut self, builder: RequestBuilder) -> Option<RequestBuilder> {
        match self {
            Self::Empty => Some(builder),
            Self::Bytes(bytes) => Some(builder.body(bytes.clone())),
            Self::Stream(reader) => reader
                .take()
                .map(|reader| builder.body(Body::wrap_stream(reader_stream(reader)))),
        }
    }
}

/// Adapts an `AsyncRead` into a stream of body chunks. Ends after the first
/// read error.
fn reader_stream(
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    futures_util::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = BytesMut::with_capacity(UPLOAD_CHUNK_BYTES);
        match reader.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(reader))),
            Err(e) => {
                warn!(error = %e, "upload source read failed");
                Some((Err(e), None))
            }
        }
    })
}

/// Extracts `realm="..."` from a `WWW-Authenticate` header.
fn parse_realm(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(WWW_AUTHENTICATE)?.to_str().ok()?;
    let start = value.find("realm=\"")? + "realm=\"".len();
    let rest = &value[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}
