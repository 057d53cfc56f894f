//! Frontend listener implementation.
//!
//! Accepts client connections, serves HTTP/1.1 on each and hands every
//! request to the dispatcher.

use crate::metrics::MetricsCollector;
use crate::proxy::{
    Dispatcher, Forward, ProxyBody, append_forwarded_for, plain_response, strip_hop_by_hop,
};
use crate::util::RequestId;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Everything a connection task needs, cloned once per connection.
struct RequestContext<F> {
    dispatcher: Arc<Dispatcher<F>>,
    max_body_size: usize,
    metrics: MetricsCollector,
}

impl<F> Clone for RequestContext<F> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            max_body_size: self.max_body_size,
            metrics: self.metrics.clone(),
        }
    }
}

/// Client-facing listener.
pub struct FrontendListener<F> {
    listener: TcpListener,
    ctx: RequestContext<F>,
}

impl<F: Forward> FrontendListener<F> {
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher<F>>,
        max_body_size: usize,
        metrics: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        info!(
            listen = %listener.local_addr()?,
            backends = dispatcher.pool().len(),
            "frontend listener bound"
        );

        Ok(Self {
            listener,
            ctx: RequestContext {
                dispatcher,
                max_body_size,
                metrics,
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("frontend listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.handle_connection(stream, addr),
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }
    }

    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let ctx = ctx.clone();
                async move { Ok::<_, Infallible>(handle_request(req, client_addr, ctx).await) }
            });

            let result = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(TokioIo::new(stream), service)
                .await;

            match result {
                Ok(()) => debug!(client = %client_addr, "connection closed"),
                Err(e) => debug!(client = %client_addr, error = %e, "connection ended with error"),
            }
        });
    }
}

/// Buffer, rewrite and dispatch one request; always yields a response.
async fn handle_request<F: Forward>(
    req: Request<Incoming>,
    client_addr: SocketAddr,
    ctx: RequestContext<F>,
) -> Response<ProxyBody> {
    let start = Instant::now();
    let request_id = RequestId::from_headers(req.headers());
    let span = info_span!(
        "request",
        request_id = %request_id,
        client = %client_addr,
        method = %req.method(),
        uri = %req.uri(),
    );

    async move {
        let mut response = match buffer_request(req, client_addr, &request_id, ctx.max_body_size).await
        {
            Ok(request) => match ctx.dispatcher.dispatch(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "request failed");
                    e.into_response()
                }
            },
            Err(rejection) => rejection,
        };

        request_id.apply(response.headers_mut());

        let status = response.status().as_u16();
        let duration = start.elapsed();
        ctx.metrics.record_request(status, duration);

        info!(
            status,
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );

        response
    }
    .instrument(span)
    .await
}

/// Collect the body (bounded) and prepare headers for the backend.
async fn buffer_request(
    req: Request<Incoming>,
    client_addr: SocketAddr,
    request_id: &RequestId,
    max_body_size: usize,
) -> Result<Request<Bytes>, Response<ProxyBody>> {
    let (mut parts, body) = req.into_parts();

    let body = match Limited::new(body, max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit = max_body_size, "request body too large");
            return Err(plain_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large\n",
            ));
        }
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return Err(plain_response(
                StatusCode::BAD_REQUEST,
                "Failed to read request body\n",
            ));
        }
    };

    strip_hop_by_hop(&mut parts.headers);
    append_forwarded_for(&mut parts.headers, client_addr.ip());
    request_id.apply(&mut parts.headers);

    Ok(Request::from_parts(parts, body))
}
