//! HTTP forwarding over the hyper-util client.

use crate::backend::BackendAddress;
use crate::config::ProxyConfig;
use crate::proxy::headers::strip_hop_by_hop;
use crate::proxy::{Forward, ForwardError, ProxyBody};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Production forwarder: one pooled HTTP/1.1 client shared by all requests.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    forward_timeout: Duration,
}

impl HttpForwarder {
    pub fn new(config: &ProxyConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.set_nodelay(true);

        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            forward_timeout: config.forward_timeout,
        }
    }
}

impl Forward for HttpForwarder {
    #[instrument(skip_all, fields(backend = %target, method = %request.method(), uri = %request.uri()))]
    async fn forward(
        &self,
        target: &BackendAddress,
        request: Request<Bytes>,
    ) -> Result<Response<ProxyBody>, ForwardError> {
        let (mut parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = target.uri_for(path_and_query)?;
        parts.uri = uri;

        let request = Request::from_parts(parts, Full::new(body));
        let response = timeout(self.forward_timeout, self.client.request(request))
            .await
            .map_err(|_| ForwardError::Timeout(self.forward_timeout))??;

        debug!(status = response.status().as_u16(), "backend responded");

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }
}
