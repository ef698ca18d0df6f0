//! Listen address resolution.
//!
//! Turns FPM `listen` values and configured socket strings into dialable
//! endpoints. Accepted forms:
//! - `unix:///run/php/fpm.sock` / `tcp://127.0.0.1:9000` (explicit scheme)
//! - `/run/php/fpm.sock` (filesystem path)
//! - `127.0.0.1:9000`, `[::1]:9000`, `localhost:9000` (host:port)
//! - `9000` (bare port, probed on the loopback addresses)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::warn;

/// Timeout for the loopback probe used for bare ports.
pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

const LOOPBACK_CANDIDATES: [&str; 2] = ["127.0.0.1", "[::1]"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Unix,
    Tcp,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Unix => "unix",
            Scheme::Tcp => "tcp",
        }
    }
}

/// A transport scheme plus dial target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub address: String,
}

impl Endpoint {
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Unix,
            address: path.into(),
        }
    }

    pub fn tcp(addr: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Tcp,
            address: addr.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("unsupported socket format: {0}")]
    Unsupported(String),
}

/// Classifies `spec` without touching the network.
///
/// Returns `Ok(None)` for empty input and for bare ports, which need
/// [`resolve_listen`] to pick a loopback address.
pub fn parse_endpoint(spec: &str) -> Result<Option<Endpoint>, AddressError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(None);
    }
    if let Some(rest) = spec.strip_prefix("unix://") {
        return Ok(Some(Endpoint::unix(rest)));
    }
    if let Some(rest) = spec.strip_prefix("tcp://") {
        return Ok(Some(Endpoint::tcp(rest)));
    }
    if spec.starts_with('/') {
        return Ok(Some(Endpoint::unix(spec)));
    }
    if spec.contains(':') {
        return Ok(Some(Endpoint::tcp(spec)));
    }
    if is_port(spec) {
        return Ok(None);
    }
    Err(AddressError::Unsupported(spec.to_string()))
}

fn is_port(spec: &str) -> bool {
    !spec.is_empty() && spec.chars().all(|c| c.is_ascii_digit()) && spec.parse::<u16>().is_ok()
}

/// Resolves an FPM `listen` value into an endpoint.
///
/// Empty input resolves to `Ok(None)`. A bare port is probed on
/// `127.0.0.1` then `[::1]`; the first one accepting a TCP connection wins,
/// and a port nobody answers on also resolves to `Ok(None)`.
pub async fn resolve_listen(spec: &str) -> Result<Option<Endpoint>, AddressError> {
    let trimmed = spec.trim();
    if let Some(endpoint) = parse_endpoint(trimmed)? {
        return Ok(Some(endpoint));
    }
    if trimmed.is_empty() {
        return Ok(None);
    }

    for host in LOOPBACK_CANDIDATES {
        let candidate = format!("{host}:{trimmed}");
        match tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(&candidate)).await {
            Ok(Ok(_conn)) => return Ok(Some(Endpoint::tcp(candidate))),
            Ok(Err(e)) => warn!("Failed to connect to PHP-FPM socket {}: {}", candidate, e),
            Err(_) => warn!("Timed out connecting to PHP-FPM socket {}", candidate),
        }
    }

    Ok(None)
}

/// Splits a configured status socket into its endpoint and the script path
/// that will be requested on it.
pub fn parse_address(addr: &str, path: &str) -> Result<(Endpoint, String), AddressError> {
    match parse_endpoint(addr)? {
        Some(endpoint) => Ok((endpoint, path.to_string())),
        None => Err(AddressError::Unsupported(addr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_unix_paths_keep_input() {
        for input in ["/var/run/php-fpm.sock", "/run/php/php8.2-fpm.sock"] {
            let endpoint = parse_endpoint(input).unwrap().unwrap();
            assert_eq!(endpoint.scheme, Scheme::Unix);
            assert_eq!(endpoint.address, input);
        }
    }

    #[test]
    fn test_host_port_pairs_are_tcp() {
        for input in ["127.0.0.1:9000", "localhost:9001", "[::1]:9000"] {
            let endpoint = parse_endpoint(input).unwrap().unwrap();
            assert_eq!(endpoint.scheme, Scheme::Tcp);
            assert_eq!(endpoint.address, input);
        }
    }

    #[test]
    fn test_explicit_scheme_is_stripped() {
        assert_eq!(
            parse_endpoint("unix:///var/run/php-fpm.sock").unwrap(),
            Some(Endpoint::unix("/var/run/php-fpm.sock"))
        );
        assert_eq!(
            parse_endpoint("tcp://10.0.0.5:9000").unwrap(),
            Some(Endpoint::tcp("10.0.0.5:9000"))
        );
        assert_eq!(
            Endpoint::unix("/run/x.sock").to_string(),
            "unix:///run/x.sock"
        );
    }

    #[test]
    fn test_invalid_format() {
        assert!(matches!(
            parse_endpoint("invalid-socket"),
            Err(AddressError::Unsupported(_))
        ));
        assert!(parse_address("", "/status").is_err());
    }

    #[test]
    fn test_parse_address_carries_path() {
        let (endpoint, path) = parse_address("unix:///run/php.sock", "/status").unwrap();
        assert_eq!(endpoint, Endpoint::unix("/run/php.sock"));
        assert_eq!(path, "/status");
    }

    #[tokio::test]
    async fn test_empty_resolves_to_none() {
        assert_eq!(resolve_listen("").await, Ok(None));
        assert_eq!(resolve_listen("   ").await, Ok(None));
    }

    #[tokio::test]
    async fn test_bare_port_probes_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let endpoint = resolve_listen(&port.to_string()).await.unwrap().unwrap();
        assert_eq!(endpoint, Endpoint::tcp(format!("127.0.0.1:{port}")));
    }

    #[tokio::test]
    async fn test_bare_port_without_listener_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = resolve_listen(&port.to_string()).await;
        assert!(
            matches!(&result, Ok(None))
                || matches!(&result, Ok(Some(e)) if e.address.starts_with("[::1]")),
            "unexpected result: {result:?}"
        );
    }
}
