//! Asynchronous HTTP transport consumed by the WebDAV core.
//!
//! The core never talks to sockets. It hands a [`Request`] to a [`Transport`]
//! together with a [`TransportEvents`] sink, and the transport reports the
//! request's progress back as [`TransportEvent`]s:
//!
//! ```text
//! submit ─► ResponseHeaders ─► DataAvailable (×n) ─► Completed
//!    │              │                                   or
//!    └──► AuthenticationRequired (answer / decline)    Failed(cause)
//! ```
//!
//! A transport must post exactly one terminal event (`Completed` or `Failed`)
//! per handle. Aborting a request produces `Failed` with
//! [`FailureCause::Cancelled`] and suppresses any later `Completed`.
//!
//! [`HttpTransport`] is the production implementation built on `reqwest`.

pub mod constants;
mod error;
mod http;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use url::Url;

pub use error::{FailureCause, TransportFailure};
pub use http::{HttpTransport, TransportConfig};

/// Opaque identifier for one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(u64);

impl RequestHandle {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Request method. WebDAV extension methods are first-class variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Mkcol,
    Copy,
    Move,
    Delete,
    /// Any other extension method, sent verbatim.
    Extension(String),
}

impl Method {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Mkcol => "MKCOL",
            Method::Copy => "COPY",
            Method::Move => "MOVE",
            Method::Delete => "DELETE",
            Method::Extension(name) => name,
        }
    }

    /// Maps a method name onto a variant, uppercasing it first.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            "MKCOL" => Method::Mkcol,
            "COPY" => Method::Copy,
            "MOVE" => Method::Move,
            "DELETE" => Method::Delete,
            other => Method::Extension(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body handed to the transport.
pub enum RequestBody {
    Empty,
    /// In-memory body. Cheap to clone, so it can be replayed after a challenge.
    Bytes(Bytes),
    /// Streamed body read once from `reader`.
    Stream {
        reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        length: Option<u64>,
    },
}

impl RequestBody {
    /// Body length when known up front.
    #[must_use]
    pub fn len(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::Stream { length, .. } => *length,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RequestBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish()
            }
        }
    }
}

/// A fully built request, ready for submission.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Sent with the first attempt instead of waiting for a challenge.
    pub credentials: Option<Credentials>,
}

impl Request {
    /// Creates a body-less request with no extra headers.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            credentials: None,
        }
    }
}

/// Username/password pair supplied in answer to a challenge.
///
/// `Debug` output never contains the password.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Pending authentication challenge. Answer it or decline it; dropping it
/// declines.
#[derive(Debug)]
pub struct AuthChallenge {
    realm: Option<String>,
    responder: oneshot::Sender<Option<Credentials>>,
}

impl AuthChallenge {
    /// Creates a challenge and the receiver the transport waits on.
    #[must_use]
    pub fn new(realm: Option<String>) -> (Self, oneshot::Receiver<Option<Credentials>>) {
        let (responder, answer) = oneshot::channel();
        (Self { realm, responder }, answer)
    }

    /// Realm announced by the server, if any.
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn answer(self, credentials: Credentials) {
        // The transport may have given up on the request already.
        let _ = self.responder.send(Some(credentials));
    }

    pub fn decline(self) {
        let _ = self.responder.send(None);
    }
}

/// Progress of a submitted request as reported by the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// Status line and headers arrived. Posted before any body data.
    ResponseHeaders {
        handle: RequestHandle,
        status: StatusCode,
    },
    /// Buffered unread body bytes crossed the read threshold.
    DataAvailable { handle: RequestHandle },
    /// The server asked for credentials.
    AuthenticationRequired {
        handle: RequestHandle,
        challenge: AuthChallenge,
    },
    /// Terminal: the exchange finished successfully.
    Completed {
        handle: RequestHandle,
        status: StatusCode,
    },
    /// Terminal: the exchange failed or was cancelled.
    Failed {
        handle: RequestHandle,
        cause: FailureCause,
    },
}

impl TransportEvent {
    #[must_use]
    pub fn handle(&self) -> RequestHandle {
        match self {
            TransportEvent::ResponseHeaders { handle, .. }
            | TransportEvent::DataAvailable { handle }
            | TransportEvent::AuthenticationRequired { handle, .. }
            | TransportEvent::Completed { handle, .. }
            | TransportEvent::Failed { handle, .. } => *handle,
        }
    }
}

/// Where a transport posts its events. Cloned into every in-flight exchange.
#[derive(Clone)]
pub struct TransportEvents {
    post: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportEvents {
    pub fn new(post: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            post: Arc::new(post),
        }
    }

    /// Events sink backed by an unbounded channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Self::new(move |event| {
            let _ = tx.send(event);
        });
        (events, rx)
    }

    pub fn post(&self, event: TransportEvent) {
        (*self.post)(event);
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents").finish_non_exhaustive()
    }
}

/// An asynchronous HTTP transport.
///
/// Every method returns immediately; work happens in the background and is
/// reported through the [`TransportEvents`] given to [`submit`](Self::submit).
pub trait Transport: Send + Sync + 'static {
    /// Starts executing `request` under `handle`.
    fn submit(&self, handle: RequestHandle, request: Request, events: TransportEvents);

    /// Drains every buffered response body byte.
    fn read_all(&self, handle: RequestHandle) -> Bytes;

    /// Cancels the request. The transport posts `Failed(Cancelled)` unless a
    /// terminal event was already posted.
    fn abort(&self, handle: RequestHandle);

    /// Drops all per-request state. Called once, after the terminal event has
    /// been fully handled.
    fn release(&self, handle: RequestHandle);
}
