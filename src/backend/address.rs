//! Backend address parsing and normalisation.

use hyper::Uri;
use hyper::http::uri::{Authority, Scheme};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing a backend address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid backend address '{0}': {1}")]
    Invalid(String, String),

    #[error("backend address '{0}' must use the http scheme")]
    UnsupportedScheme(String),

    #[error("backend address '{0}' has no host")]
    MissingHost(String),

    #[error("backend address '{0}' must not carry a path or query")]
    UnexpectedPath(String),
}

/// Network address of one upstream server.
///
/// Always stored in the normalised `http://host:port` form, which is also the
/// equality key used when marking backends alive or dead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackendAddress {
    authority: Authority,
    host: String,
    port: u16,
}

impl BackendAddress {
    /// Host part, without brackets for IPv6 literals.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, defaulting to 80 when the address omitted it.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` authority used as the target of forwarded requests.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Build the absolute URI for a request path on this backend.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, hyper::http::Error> {
        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }
}

impl FromStr for BackendAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri: Uri = s
            .trim()
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| AddressError::Invalid(s.to_string(), e.to_string()))?;

        match uri.scheme_str() {
            Some("http") => {}
            _ => return Err(AddressError::UnsupportedScheme(s.to_string())),
        }

        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AddressError::MissingHost(s.to_string()))?;

        if let Some(pq) = uri.path_and_query() {
            if (pq.path() != "/" && !pq.path().is_empty()) || pq.query().is_some() {
                return Err(AddressError::UnexpectedPath(s.to_string()));
            }
        }

        let port = uri.port_u16().unwrap_or(80);
        let authority: Authority = format!("{}:{}", host, port)
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| AddressError::Invalid(s.to_string(), e.to_string()))?;

        Ok(Self {
            authority,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

impl TryFrom<String> for BackendAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendAddress> for String {
    fn from(addr: BackendAddress) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}", self.authority)
    }
}
