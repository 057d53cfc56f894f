//! Request forwarding and the retry/failover dispatcher.

mod dispatcher;
mod forward;
mod headers;
mod http_proxy;

pub use dispatcher::{Counters, DispatchError, Dispatcher, RetryPolicy};
pub(crate) use dispatcher::plain_response;
pub use forward::{Forward, ForwardError, ProxyBody};
pub use headers::{append_forwarded_for, strip_hop_by_hop};
pub use http_proxy::HttpForwarder;
