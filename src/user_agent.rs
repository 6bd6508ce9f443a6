//! User-Agent string sent by the HTTP transport.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/webdav-client";

/// Default User-Agent for WebDAV requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("webdav-client/{version} (+{PROJECT_UA_URL})")
}
