//! WebDAV client core.
//!
//! This module translates WebDAV operations into transport requests and
//! drives every in-flight request to exactly one [`Outcome`]:
//!
//! - [`ConnectionConfig`] - scheme, host, port, root path and credentials
//! - [`WebDavClient`] - the operations (`fetch`, `store`, `create_collection`,
//!   `copy`, `move_to`, `remove`, `send_custom`) and cancellation
//! - [`Reply`] - per-request handle and outcome
//! - [`ErrorEvent`] - non-cancellation failures broadcast to subscribers
//!
//! Requests run in the background. Response bodies stream into caller sinks
//! as the transport signals data, and every sink, request body and transport
//! buffer is released exactly once whether the request completes, fails or is
//! cancelled.

mod auth;
mod client;
mod config;
mod dispatcher;
mod error;
mod request;
mod sink;

pub use client::{Completion, ErrorEvent, Outcome, Reply, WebDavClient};
pub use config::{ConfigError, ConnectionConfig, Scheme};
pub use error::DavError;
