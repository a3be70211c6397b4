//! Named endpoint: scheme, host, port.

use crate::config::Authority;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A connect target that may require name resolution. Unlike [`Authority`],
/// the host may be a DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    scheme: Option<String>,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { scheme: None, host: host.into(), port }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form handed to the resolver.
    pub fn to_lookup(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// An authority when the host is a literal address.
    pub fn to_authority(&self) -> Option<Authority> {
        self.host
            .trim_matches(['[', ']'])
            .parse::<IpAddr>()
            .ok()
            .map(|ip| Authority::new(ip, self.port))
    }
}

impl From<Authority> for Endpoint {
    fn from(authority: Authority) -> Self {
        let host = match authority.ip() {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{ip}]"),
        };
        Self { scheme: None, host, port: authority.port() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// `[scheme://]host[:port]`; a missing port parses as zero.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = match text.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => (Some(scheme.to_owned()), rest),
            Some(_) => return Err(EndpointParseError(text.into())),
            None => (None, text),
        };

        if rest.is_empty() {
            return Err(EndpointParseError(text.into()));
        }

        // Bracketed ipv6 hosts carry colons of their own.
        let (host, port) = if let Some(end) = rest.find(']') {
            match rest[end + 1..].strip_prefix(':') {
                Some(port) => (&rest[..=end], port),
                None => (rest, ""),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, port),
                None => (rest, ""),
            }
        };

        let port = if port.is_empty() {
            0
        } else {
            port.parse::<u16>().map_err(|_| EndpointParseError(text.into()))?
        };

        Ok(Self { scheme, host: host.to_owned(), port })
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid endpoint: {0}")]
pub struct EndpointParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_host() {
        let endpoint: Endpoint = "seed.example.org:8333".parse().unwrap();
        assert_eq!(endpoint.host(), "seed.example.org");
        assert_eq!(endpoint.port(), 8333);
        assert_eq!(endpoint.scheme(), None);
        assert!(endpoint.to_authority().is_none());
    }

    #[test]
    fn test_parse_scheme_and_literal() {
        let endpoint: Endpoint = "tcp://127.0.0.1:18333".parse().unwrap();
        assert_eq!(endpoint.scheme(), Some("tcp"));
        let authority = endpoint.to_authority().unwrap();
        assert_eq!(authority, "127.0.0.1:18333".parse().unwrap());
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let endpoint: Endpoint = "[2001:db8::1]:8333".parse().unwrap();
        assert_eq!(endpoint.port(), 8333);
        assert!(endpoint.to_authority().is_some());
    }

    #[test]
    fn test_missing_port_defaults_to_zero() {
        let endpoint: Endpoint = "seed.example.org".parse().unwrap();
        assert_eq!(endpoint.port(), 0);
    }
}
