//! The forwarding seam between the dispatcher and the HTTP transport.

use crate::backend::BackendAddress;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Response body streamed back to the client.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Transport failures while forwarding one request to one backend.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream URI: {0}")]
    InvalidUri(#[from] hyper::http::Error),

    #[error("backend request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Whether the backend is to blame. Only these failures count towards
    /// retries and liveness.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(self, Self::InvalidUri(_))
    }
}

/// Forwards a buffered request to a backend and returns its response.
///
/// Any `Err` counts as a transport failure of that backend. An `Ok` response
/// is passed to the client untouched, whatever its status code.
pub trait Forward: Send + Sync + 'static {
    fn forward(
        &self,
        target: &BackendAddress,
        request: Request<Bytes>,
    ) -> impl Future<Output = Result<Response<ProxyBody>, ForwardError>> + Send;
}
