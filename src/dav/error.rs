//! Error types for WebDAV operations.
//!
//! Every failure a request can end in is a [`DavError`]. The `Display` text is
//! what observers receive through [`ErrorEvent`](super::ErrorEvent).

use reqwest::StatusCode;
use thiserror::Error;

use crate::transport::{RequestHandle, TransportFailure};

/// Errors that can end a WebDAV request.
#[derive(Debug, Error)]
pub enum DavError {
    /// The transport reported a failure. Displays the transport's description
    /// verbatim.
    #[error("{failure}")]
    Transport {
        /// The request that failed.
        handle: RequestHandle,
        /// What the transport reported.
        #[source]
        failure: TransportFailure,
    },

    /// The server challenged the same request twice.
    #[error("authentication rejected for {url}: check WebDAV connection settings")]
    AuthenticationRejected {
        /// The URL being requested.
        url: String,
    },

    /// A range fetch was answered with something other than `206 Partial Content`.
    #[error("range request from byte {offset} for {url} was not honoured (HTTP {status})")]
    RangeNotHonoured {
        /// The URL being fetched.
        url: String,
        /// Requested start offset.
        offset: u64,
        /// The status the server answered with.
        status: u16,
    },

    /// Writing response data into the caller's sink failed.
    #[error("failed writing response body of {url} to sink: {source}")]
    Sink {
        /// The URL being fetched.
        url: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A header value could not be encoded (e.g. a destination URL with
    /// control characters).
    #[error("invalid value for header {name}: {value:?}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The client was dropped before the request finished.
    #[error("request {handle} abandoned: WebDAV client shut down")]
    DispatcherClosed {
        /// The abandoned request.
        handle: RequestHandle,
    },

    /// The request was cancelled. Only produced by
    /// [`Reply::completed`](super::Reply::completed); cancellation is never
    /// reported to observers.
    #[error("request {handle} was cancelled")]
    Cancelled {
        /// The cancelled request.
        handle: RequestHandle,
    },
}

impl DavError {
    /// Creates a transport error.
    pub fn transport(handle: RequestHandle, failure: TransportFailure) -> Self {
        Self::Transport { handle, failure }
    }

    /// Creates an authentication rejection error.
    pub fn authentication_rejected(url: impl Into<String>) -> Self {
        Self::AuthenticationRejected { url: url.into() }
    }

    /// Creates a range-not-honoured error.
    pub fn range_not_honoured(url: impl Into<String>, offset: u64, status: StatusCode) -> Self {
        Self::RangeNotHonoured {
            url: url.into(),
            offset,
            status: status.as_u16(),
        }
    }

    /// Creates a sink error.
    pub fn sink(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Sink {
            url: url.into(),
            source,
        }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name,
            value: value.into(),
        }
    }
}
