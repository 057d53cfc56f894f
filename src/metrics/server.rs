//! Prometheus metrics HTTP server.

use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serves the collector's registry on a configurable path.
pub struct MetricsServer {
    listener: TcpListener,
    path: String,
    collector: MetricsCollector,
}

impl MetricsServer {
    /// Bind the metrics listener.
    pub async fn bind(
        address: SocketAddr,
        path: String,
        collector: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            path,
            collector,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve scrapes until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(address) = self.listener.local_addr() {
            info!(address = %address, path = %self.path, "metrics server started");
        }

        let collector = Arc::new(self.collector);
        let path = Arc::new(self.path);

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let collector = Arc::clone(&collector);
                            let path = Arc::clone(&path);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let collector = Arc::clone(&collector);
                                    let path = Arc::clone(&path);
                                    async move { handle_request(req, &collector, &path) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

fn handle_request<B>(
    req: Request<B>,
    collector: &MetricsCollector,
    metrics_path: &str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    debug!(path = %path, method = %req.method(), "metrics request");

    if req.method() != Method::GET {
        return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n"));
    }

    if path == metrics_path {
        match collector.encode() {
            Ok(buffer) => {
                let mut response = text_response(StatusCode::OK, buffer);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
                Ok(response)
            }
            Err(e) => {
                error!(error = %e, "failed to encode metrics");
                Ok(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to encode metrics\n",
                ))
            }
        }
    } else if path == "/health" || path == "/healthz" {
        Ok(text_response(StatusCode::OK, "OK\n"))
    } else {
        Ok(text_response(StatusCode::NOT_FOUND, "Not found\n"))
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
