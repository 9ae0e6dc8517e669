pub mod connection;
pub mod dispatcher;

pub use dispatcher::{AckHandle, DEFAULT_ACK_TIMEOUT, Dispatcher};
