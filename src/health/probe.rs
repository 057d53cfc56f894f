//! Connectivity probes used by health-check sweeps.

use crate::backend::BackendAddress;
use crate::config::{HealthCheckConfig, HealthCheckType};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const MAX_STATUS_LINE: usize = 1024;

/// Why a probe considered a backend unreachable.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("empty response")]
    EmptyResponse,

    #[error("invalid HTTP response")]
    InvalidResponse,

    #[error("unexpected status: {got} (expected {expected})")]
    UnexpectedStatus { got: u16, expected: u16 },
}

/// What a probe does once it reaches the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeKind {
    /// Succeed as soon as a TCP connection is established.
    Tcp,
    /// Issue `GET path` and require the given status code.
    Http { path: String, expected_status: u16 },
}

/// A bounded-time liveness probe.
#[derive(Debug, Clone)]
pub struct Probe {
    kind: ProbeKind,
    timeout: Duration,
}

impl Probe {
    pub fn new(kind: ProbeKind, timeout: Duration) -> Self {
        Self { kind, timeout }
    }

    /// Build a probe from the `health_check` configuration section.
    pub fn from_config(config: &HealthCheckConfig) -> Self {
        let kind = match config.check_type {
            HealthCheckType::Tcp => ProbeKind::Tcp,
            HealthCheckType::Http => ProbeKind::Http {
                path: config.path.clone().unwrap_or_else(|| "/".to_string()),
                expected_status: config.expected_status,
            },
        };
        Self::new(kind, config.timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one backend. The whole probe, connect included, is bounded by the
    /// probe timeout.
    pub async fn check(&self, address: &BackendAddress) -> Result<(), ProbeError> {
        timeout(self.timeout, self.run(address))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }

    async fn run(&self, address: &BackendAddress) -> Result<(), ProbeError> {
        let stream = TcpStream::connect((address.host(), address.port()))
            .await
            .map_err(ProbeError::Connect)?;

        match &self.kind {
            ProbeKind::Tcp => Ok(()),
            ProbeKind::Http {
                path,
                expected_status,
            } => http_probe(stream, address, path, *expected_status).await,
        }
    }
}

/// Send a minimal HTTP/1.1 request and check the status line.
async fn http_probe(
    mut stream: TcpStream,
    address: &BackendAddress,
    path: &str,
    expected_status: u16,
) -> Result<(), ProbeError> {
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: rrproxy-health-check\r\nConnection: close\r\n\r\n",
        path,
        address.authority()
    );

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(ProbeError::Write)?;

    let status_line = read_status_line(&mut stream).await?;
    let status = parse_http_status(&String::from_utf8_lossy(&status_line))?;
    if status == expected_status {
        Ok(())
    } else {
        Err(ProbeError::UnexpectedStatus {
            got: status,
            expected: expected_status,
        })
    }
}

/// Read until the end of the status line, the peer closing, or the size cap.
async fn read_status_line(stream: &mut TcpStream) -> Result<Vec<u8>, ProbeError> {
    let mut buf = vec![0u8; MAX_STATUS_LINE];
    let mut filled = 0;

    while filled < buf.len() {
        let n = stream
            .read(&mut buf[filled..])
            .await
            .map_err(ProbeError::Read)?;
        if n == 0 {
            break;
        }
        filled += n;
        if buf[..filled].windows(2).any(|w| w == b"\r\n") {
            break;
        }
    }

    if filled == 0 {
        return Err(ProbeError::EmptyResponse);
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Parse the status code out of `HTTP/1.1 200 OK\r\n...`.
fn parse_http_status(response: &str) -> Result<u16, ProbeError> {
    let mut parts = response.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => {
            code.parse().map_err(|_| ProbeError::InvalidResponse)
        }
        _ => Err(ProbeError::InvalidResponse),
    }
}
