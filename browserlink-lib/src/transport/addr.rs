use url::Url;

use crate::error::{BrowserLinkError, Result};

/// Where and what to request on the host, derived from a verb URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
    /// Value for the `Host` request header (`host:port`).
    pub authority: String,
    /// Request target: path plus query, never empty.
    pub path_and_query: String,
}

impl HostAddr {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| BrowserLinkError::InvalidUri(format!("{}: {}", url, e)))?;
        Self::from_url(&parsed)
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| BrowserLinkError::InvalidUri(format!("{}: no host", url)))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| BrowserLinkError::InvalidUri(format!("{}: no port", url)))?;

        let mut path_and_query = url.path().to_string();
        if path_and_query.is_empty() {
            path_and_query.push('/');
        }
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        Ok(Self {
            authority: format!("{}:{}", host, port),
            host,
            port,
            path_and_query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_port_and_path() {
        let a = HostAddr::parse("http://localhost:3082/KEY/injectScriptLink").unwrap();
        assert_eq!(a.host, "localhost");
        assert_eq!(a.port, 3082);
        assert_eq!(a.authority, "localhost:3082");
        assert_eq!(a.path_and_query, "/KEY/injectScriptLink");
    }

    #[test]
    fn test_default_http_port() {
        let a = HostAddr::parse("http://localhost/x").unwrap();
        assert_eq!(a.port, 80);
        assert_eq!(a.authority, "localhost:80");
    }

    #[test]
    fn test_default_https_port() {
        let a = HostAddr::parse("https://example.com/x").unwrap();
        assert_eq!(a.port, 443);
    }

    #[test]
    fn test_query_is_kept() {
        let a = HostAddr::parse("http://127.0.0.1:9000/a/b?c=d&e").unwrap();
        assert_eq!(a.host, "127.0.0.1");
        assert_eq!(a.path_and_query, "/a/b?c=d&e");
    }

    #[test]
    fn test_root_path() {
        let a = HostAddr::parse("http://localhost:1234").unwrap();
        assert_eq!(a.path_and_query, "/");
    }

    #[test]
    fn test_relative_uri_rejected() {
        assert!(matches!(HostAddr::parse("/no/host"), Err(BrowserLinkError::InvalidUri(_))));
    }

    #[test]
    fn test_unknown_scheme_without_port_rejected() {
        assert!(HostAddr::parse("foo://localhost/x").is_err());
    }
}
