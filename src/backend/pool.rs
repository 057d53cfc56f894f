//! The backend pool: rotation cursor, live-skipping selection and liveness
//! sweeps.

use crate::backend::{Backend, BackendAddress};
use crate::health::Probe;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Ordered, fixed set of backends shared by every request task.
///
/// Membership is built during setup through [`BackendPool::append_backend`],
/// which needs `&mut self`. Once the pool is wrapped in an `Arc` only the
/// rotation cursor and the per-backend liveness flags change.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    cursor: AtomicUsize,
}

/// Result of probing one backend during a sweep.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Address that was probed.
    pub address: BackendAddress,
    /// Liveness written back to the backend.
    pub alive: bool,
    /// Whether the flag changed as a result of this probe.
    pub changed: bool,
    /// Probe failure description, if any.
    pub error: Option<String>,
}

/// Outcome of one full health-check sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub outcomes: Vec<ProbeOutcome>,
}

impl SweepReport {
    /// Number of backends found alive.
    pub fn alive(&self) -> usize {
        self.outcomes.iter().filter(|o| o.alive).count()
    }

    /// Number of backends found dead.
    pub fn dead(&self) -> usize {
        self.outcomes.len() - self.alive()
    }
}

impl BackendPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from a static address list, every backend starting alive.
    pub fn from_addresses<I>(addresses: I) -> Self
    where
        I: IntoIterator<Item = BackendAddress>,
    {
        let mut pool = Self::new();
        for address in addresses {
            pool.append_backend(Backend::new(address));
        }
        pool
    }

    /// Add a backend to the end of the rotation. Setup-time only.
    pub fn append_backend(&mut self, backend: Backend) {
        debug!(backend = %backend.address(), "backend added to pool");
        self.backends.push(Arc::new(backend));
    }

    /// All backends in rotation order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Claim the next rotation slot.
    ///
    /// Every call takes a distinct cursor value; the returned index is that
    /// value modulo the pool size. `None` for an empty pool.
    pub fn next_index(&self) -> Option<usize> {
        if self.backends.is_empty() {
            return None;
        }
        Some(self.cursor.fetch_add(1, Ordering::Relaxed) % self.backends.len())
    }

    /// Pick the next alive backend in round-robin order.
    ///
    /// Scans at most one lap starting at the claimed slot. When dead backends
    /// had to be skipped, the cursor is moved so rotation resumes right after
    /// the backend that was found.
    pub fn get_next_server(&self) -> Option<Arc<Backend>> {
        let start = self.next_index()?;
        let len = self.backends.len();

        for offset in 0..len {
            let idx = (start + offset) % len;
            let backend = &self.backends[idx];
            if backend.get_status() {
                if offset != 0 {
                    self.cursor.store(idx + 1, Ordering::Relaxed);
                }
                return Some(Arc::clone(backend));
            }
        }

        None
    }

    /// Set the liveness of the backend with the given address.
    ///
    /// Unknown addresses are ignored.
    pub fn set_backend_status(&self, address: &BackendAddress, alive: bool) {
        match self.backends.iter().find(|b| b.address() == address) {
            Some(backend) => {
                backend.set_status(alive);
            }
            None => {
                debug!(backend = %address, "status update for unknown backend ignored");
            }
        }
    }

    /// Probe every backend and record the result as its liveness.
    ///
    /// Probes run concurrently, so a sweep takes at most one probe timeout.
    /// Probe failures only feed the liveness flags; the sweep itself never
    /// fails.
    pub async fn health_check(&self, probe: &Probe) -> SweepReport {
        let checks = self.backends.iter().map(|backend| async move {
            let result = probe.check(backend.address()).await;
            let alive = result.is_ok();
            let was_alive = backend.set_status(alive);
            let error = result.err().map(|e| e.to_string());

            match (&error, was_alive != alive) {
                (None, true) => info!(backend = %backend.address(), status = "running", "backend is back up"),
                (Some(e), true) => warn!(backend = %backend.address(), status = "down", error = %e, "backend went down"),
                (None, false) => info!(backend = %backend.address(), status = "running", "health check"),
                (Some(e), false) => info!(backend = %backend.address(), status = "down", error = %e, "health check"),
            }

            ProbeOutcome {
                address: backend.address().clone(),
                alive,
                changed: was_alive != alive,
                error,
            }
        });

        SweepReport {
            outcomes: join_all(checks).await,
        }
    }
}
