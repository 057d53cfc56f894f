//! Backend pool management and round-robin selection.

mod address;
mod pool;
mod server;

pub use address::{AddressError, BackendAddress};
pub use pool::{BackendPool, ProbeOutcome, SweepReport};
pub use server::Backend;
