//! WebDAV Client Core Library
//!
//! An asynchronous WebDAV client built over a pluggable HTTP transport. It
//! turns WebDAV operations (fetch, store, create-collection, copy, move,
//! delete, partial-range fetch) into HTTP requests and manages each request's
//! lifecycle: streaming bodies into caller sinks, releasing resources exactly
//! once, and bounding authentication to one challenge round per request.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`transport`] - Transport trait, request/event types and the `reqwest` adapter
//! - [`dav`] - Connection configuration, operation builders and the request dispatcher

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dav;
#[cfg(test)]
pub mod test_support;
pub mod transport;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use dav::{
    Completion, ConfigError, ConnectionConfig, DavError, ErrorEvent, Outcome, Reply, Scheme,
    WebDavClient,
};
pub use transport::{
    Credentials, FailureCause, HttpTransport, RequestHandle, Transport, TransportConfig,
    TransportFailure,
};
