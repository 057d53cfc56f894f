//! A single upstream server and its liveness flag.

use crate::backend::BackendAddress;
use parking_lot::RwLock;

/// One upstream target of the pool.
///
/// The address never changes after construction. The liveness flag is written
/// by the health monitor and by failover in the dispatcher; last write wins.
#[derive(Debug)]
pub struct Backend {
    address: BackendAddress,
    alive: RwLock<bool>,
}

impl Backend {
    /// Create a backend that starts out alive.
    pub fn new(address: BackendAddress) -> Self {
        Self::with_status(address, true)
    }

    /// Create a backend with an explicit initial liveness.
    pub fn with_status(address: BackendAddress, alive: bool) -> Self {
        Self {
            address,
            alive: RwLock::new(alive),
        }
    }

    /// The backend's address.
    pub fn address(&self) -> &BackendAddress {
        &self.address
    }

    /// Overwrite the liveness flag, returning the previous value.
    pub fn set_status(&self, alive: bool) -> bool {
        std::mem::replace(&mut *self.alive.write(), alive)
    }

    /// Read the liveness flag.
    pub fn get_status(&self) -> bool {
        *self.alive.read()
    }
}
