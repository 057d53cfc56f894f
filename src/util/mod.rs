//! Process-level helpers: logging, shutdown and request IDs.

mod logging;
mod request_id;
mod shutdown;

pub use logging::init_logging;
pub use request_id::{RequestId, X_REQUEST_ID};
pub use shutdown::ShutdownSignal;
