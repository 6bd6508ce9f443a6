//! Per-operation request construction.
//!
//! Builders only shape the [`Request`]; bindings and submission belong to the
//! client.

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue, RANGE};
use tokio::io::AsyncRead;

use super::config::ConnectionConfig;
use super::error::DavError;
use crate::transport::{Method, Request, RequestBody};

const DESTINATION: HeaderName = HeaderName::from_static("destination");
const DEPTH: HeaderName = HeaderName::from_static("depth");
const OVERWRITE: HeaderName = HeaderName::from_static("overwrite");

/// Content type of body-bearing extension requests.
const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

fn header_value(name: &'static str, value: String) -> Result<HeaderValue, DavError> {
    HeaderValue::try_from(value.as_str()).map_err(|_| DavError::invalid_header(name, value))
}

/// `GET`, with `Range: bytes=<offset>-` when `offset > 0`.
pub(crate) fn fetch(config: &ConnectionConfig, path: &str, offset: u64) -> Result<Request, DavError> {
    let mut request = Request::new(Method::Get, config.url_for(path));
    if offset > 0 {
        let range = header_value("range", format!("bytes={offset}-"))?;
        request.headers.insert(RANGE, range);
    }
    Ok(request)
}

/// `PUT` with an in-memory body.
pub(crate) fn store(config: &ConnectionConfig, path: &str, body: Bytes) -> Request {
    let mut request = Request::new(Method::Put, config.url_for(path));
    request
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    request.body = RequestBody::Bytes(body);
    request
}

/// `PUT` with a streamed body. `Content-Length` is only set when `length` is
/// known. The body cannot be resent after a challenge, so configured
/// credentials are attached up front.
pub(crate) fn store_from(
    config: &ConnectionConfig,
    path: &str,
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    length: Option<u64>,
) -> Request {
    let mut request = Request::new(Method::Put, config.url_for(path));
    if let Some(length) = length {
        request
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    request.body = RequestBody::Stream { reader, length };
    let credentials = config.auth_credentials();
    if !credentials.is_empty() {
        request.credentials = Some(credentials.clone());
    }
    request
}

/// `MKCOL`, no body.
pub(crate) fn create_collection(config: &ConnectionConfig, path: &str) -> Request {
    Request::new(Method::Mkcol, config.url_for(path))
}

/// `COPY` or `MOVE` with `Destination`, `Depth: infinity` and `Overwrite`.
pub(crate) fn transfer(
    config: &ConnectionConfig,
    method: Method,
    from: &str,
    to: &str,
    overwrite: bool,
) -> Result<Request, DavError> {
    let mut request = Request::new(method, config.url_for(from));
    let destination = header_value("destination", config.url_for(to).to_string())?;
    request.headers.insert(DESTINATION, destination);
    request
        .headers
        .insert(DEPTH, HeaderValue::from_static("infinity"));
    request.headers.insert(
        OVERWRITE,
        HeaderValue::from_static(if overwrite { "T" } else { "F" }),
    );
    Ok(request)
}

/// `DELETE`, no body.
pub(crate) fn remove(config: &ConnectionConfig, path: &str) -> Request {
    Request::new(Method::Delete, config.url_for(path))
}

/// Arbitrary method with an optional XML body.
pub(crate) fn custom(config: &ConnectionConfig, method: &str, path: &str, body: Bytes) -> Request {
    let mut request = Request::new(Method::from_name(method), config.url_for(path));
    if !body.is_empty() {
        request
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
        request.body = RequestBody::Bytes(body);
    }
    request
}
