//! Client-facing side: accepts connections and serves HTTP/1.1.

mod listener;

pub use listener::FrontendListener;
