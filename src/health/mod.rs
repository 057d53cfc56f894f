//! Active health checking for backend servers.

mod monitor;
mod probe;

pub use monitor::HealthMonitor;
pub use probe::{Probe, ProbeError, ProbeKind};
