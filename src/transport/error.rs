//! Failure causes reported by a transport.

use std::error::Error as _;

use reqwest::StatusCode;
use thiserror::Error;

/// Why a request failed. Cancellation is kept apart from real errors because
/// the core treats it as a silent outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The request was aborted before it finished.
    Cancelled,
    /// Any network, protocol or server error.
    Error(TransportFailure),
}

impl FailureCause {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FailureCause::Cancelled)
    }
}

/// A non-cancellation transport failure. The `Display` text is what the core
/// surfaces to observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    /// DNS, connection, TLS or body-stream error.
    #[error("network error requesting {url}: {description}")]
    Network {
        /// The URL being requested.
        url: String,
        /// Flattened description of the underlying error chain.
        description: String,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Server answered with a non-success status.
    #[error("HTTP {status} requesting {url}: server replied {reason}")]
    Status {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
    },

    /// Server demanded credentials and none were supplied.
    #[error("HTTP 401 requesting {url}: authentication required")]
    Unauthorized {
        /// The URL that demanded credentials.
        url: String,
    },

    /// A streamed body was already consumed when the server challenged.
    #[error("request body for {url} was already streamed and cannot be resent after an authentication challenge")]
    BodyNotReplayable {
        /// The URL being requested.
        url: String,
    },

    /// The request could not be built (bad method token or header).
    #[error("invalid request for {url}: {reason}")]
    InvalidRequest {
        /// The URL being requested.
        url: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl TransportFailure {
    /// Classifies a reqwest error, flattening its source chain into text.
    #[must_use]
    pub fn from_reqwest(url: impl Into<String>, error: &reqwest::Error) -> Self {
        let url = url.into();
        if error.is_timeout() {
            return Self::Timeout { url };
        }
        let mut description = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            description.push_str(": ");
            description.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Network { url, description }
    }

    /// Creates an HTTP status failure.
    #[must_use]
    pub fn status(url: impl Into<String>, status: StatusCode) -> Self {
        Self::Status {
            url: url.into(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        }
    }

    /// Creates an unauthorized failure.
    #[must_use]
    pub fn unauthorized(url: impl Into<String>) -> Self {
        Self::Unauthorized { url: url.into() }
    }

    /// Creates an unreplayable body failure.
    #[must_use]
    pub fn body_not_replayable(url: impl Into<String>) -> Self {
        Self::BodyNotReplayable { url: url.into() }
    }

    /// Creates an invalid request failure.
    #[must_use]
    pub fn invalid_request(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status code, for status failures.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }
}
