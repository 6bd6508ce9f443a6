//! Connection configuration and resource URL resolution.

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::transport::Credentials;

/// URL scheme of the WebDAV server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Conventional port, omitted from URLs when configured explicitly.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected connection settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("WebDAV host must not be empty")]
    EmptyHost,

    #[error("invalid WebDAV host '{host}': {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },

    /// The host parsed, but as something other than a bare host name
    /// (for example it smuggled in a path or a port).
    #[error("invalid WebDAV host '{host}': expected a bare host name")]
    MalformedHost { host: String },
}

/// Where the server lives and how to log in.
///
/// Built once and installed with [`WebDavClient::configure`]; installing a new
/// config replaces every field.
///
/// ```
/// use webdav_core::dav::{ConnectionConfig, Scheme};
///
/// # fn example() -> Result<(), webdav_core::dav::ConfigError> {
/// let config = ConnectionConfig::new(Scheme::Https, "dav.example.com")?
///     .root_path("/remote.php/webdav/")
///     .credentials("alice", "secret");
/// assert_eq!(config.resolve("/notes.txt"), "/remote.php/webdav/notes.txt");
/// # Ok(())
/// # }
/// ```
///
/// [`WebDavClient::configure`]: crate::dav::WebDavClient::configure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    scheme: Scheme,
    host: String,
    port: u16,
    root_path: String,
    credentials: Credentials,
    /// `scheme://host/`, validated once; the port is applied on access.
    origin: Url,
}

impl ConnectionConfig {
    /// Creates a config with root `/`, no credentials and the scheme's
    /// default port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `host` is empty or is not a bare host name.
    pub fn new(scheme: Scheme, host: impl Into<String>) -> Result<Self, ConfigError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        let origin = Url::parse(&format!("{scheme}://{host}/")).map_err(|source| {
            ConfigError::InvalidHost {
                host: host.clone(),
                source,
            }
        })?;
        let parsed_host = origin.host_str().unwrap_or_default();
        if !parsed_host.eq_ignore_ascii_case(&host)
            || origin.port().is_some()
            || origin.path() != "/"
        {
            return Err(ConfigError::MalformedHost { host });
        }

        Ok(Self {
            scheme,
            host,
            port: 0,
            root_path: String::new(),
            credentials: Credentials::default(),
            origin,
        })
    }

    /// Sets the root path. Exactly one trailing `/` is stripped, so `"/"`
    /// becomes the empty root.
    #[must_use]
    pub fn root_path(mut self, root_path: impl Into<String>) -> Self {
        let mut root_path = root_path.into();
        if root_path.ends_with('/') {
            root_path.pop();
        }
        self.root_path = root_path;
        self
    }

    /// Sets the credentials answered on an authentication challenge.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::new(username, password);
        self
    }

    /// Sets the port; `0` means the scheme default.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port written into URLs, `None` when it is the scheme default.
    #[must_use]
    pub fn effective_port(&self) -> Option<u16> {
        match self.port {
            0 => None,
            port if port == self.scheme.default_port() => None,
            port => Some(port),
        }
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Normalized root path (never ends in `/`).
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root_path
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.credentials.username()
    }

    #[must_use]
    pub fn password(&self) -> &str {
        self.credentials.password()
    }

    #[must_use]
    pub fn auth_credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// `scheme://host[:port]/`, with the port omitted when it is the default.
    #[must_use]
    pub fn base_url(&self) -> Url {
        let mut url = self.origin.clone();
        // Cannot fail: the origin is a validated http(s) URL with a host.
        let _ = url.set_port(self.effective_port());
        url
    }

    /// Root path followed by `path`, with no separator handling.
    #[must_use]
    pub fn resolve(&self, path: &str) -> String {
        format!("{}{path}", self.root_path)
    }

    /// Absolute URL of the resource at `path`.
    #[must_use]
    pub fn url_for(&self, path: &str) -> Url {
        let mut url = self.base_url();
        url.set_path(&self.resolve(path));
        url
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn https(host: &str) -> ConnectionConfig {
        ConnectionConfig::new(Scheme::Https, host).unwrap()
    }

    #[test]
    fn test_default_port_is_omitted() {
        let config = https("dav.example.com").port(443);
        assert_eq!(config.effective_port(), None);
        assert_eq!(config.base_url().as_str(), "https://dav.example.com/");

        let config = ConnectionConfig::new(Scheme::Http, "dav.example.com")
            .unwrap()
            .port(80);
        assert_eq!(config.base_url().as_str(), "http://dav.example.com/");
    }

    #[test]
    fn test_non_default_port_is_kept() {
        let config = https("dav.example.com").port(8443);
        assert_eq!(config.effective_port(), Some(8443));
        assert_eq!(config.base_url().as_str(), "https://dav.example.com:8443/");

        // 443 is only the default for https.
        let config = ConnectionConfig::new(Scheme::Http, "dav.example.com")
            .unwrap()
            .port(443);
        assert_eq!(config.base_url().as_str(), "http://dav.example.com:443/");
    }

    #[test]
    fn test_resolve_concatenates_with_normalized_root() {
        let with_slash = https("dav.example.com").root_path("/dav/");
        let without = https("dav.example.com").root_path("/dav");
        assert_eq!(with_slash.root(), "/dav");
        assert_eq!(with_slash.resolve("/test"), "/dav/test");
        assert_eq!(without.resolve("/test"), "/dav/test");
    }

    #[test]
    fn test_root_slash_becomes_empty() {
        let config = https("dav.example.com").root_path("/");
        assert_eq!(config.root(), "");
        assert_eq!(config.resolve("/test"), "/test");
        assert_eq!(
            config.url_for("/test/test").as_str(),
            "https://dav.example.com/test/test"
        );
    }

    #[test]
    fn test_only_one_trailing_separator_stripped() {
        let config = https("dav.example.com").root_path("/dav//");
        assert_eq!(config.root(), "/dav/");
    }

    #[test]
    fn test_url_for_includes_port_and_root() {
        let config = https("dav.example.com").port(8443).root_path("/files/");
        assert_eq!(
            config.url_for("/a b.txt").as_str(),
            "https://dav.example.com:8443/files/a%20b.txt"
        );
    }

    #[test]
    fn test_credentials_and_defaults() {
        let config = https("dav.example.com");
        assert_eq!(config.username(), "");
        assert_eq!(config.password(), "");
        assert!(config.is_secure());
        assert_eq!(config.root(), "");

        let config = config.credentials("alice", "secret");
        assert_eq!(config.username(), "alice");
        assert_eq!(config.password(), "secret");
        assert_eq!(config.auth_credentials(), &Credentials::new("alice", "secret"));
    }

    #[test]
    fn test_invalid_hosts_rejected() {
        assert!(matches!(
            ConnectionConfig::new(Scheme::Https, ""),
            Err(ConfigError::EmptyHost)
        ));
        assert!(matches!(
            ConnectionConfig::new(Scheme::Https, "bad host"),
            Err(ConfigError::InvalidHost { .. })
        ));
        assert!(matches!(
            ConnectionConfig::new(Scheme::Https, "dav.example.com/path"),
            Err(ConfigError::MalformedHost { .. })
        ));
        assert!(matches!(
            ConnectionConfig::new(Scheme::Https, "dav.example.com:8443"),
            Err(ConfigError::MalformedHost { .. })
        ));
    }

    #[test]
    fn test_ip_host_accepted() {
        let config = ConnectionConfig::new(Scheme::Http, "127.0.0.1").unwrap().port(8080);
        assert_eq!(config.base_url().as_str(), "http://127.0.0.1:8080/");
    }
}
