pub mod api;
pub mod error;
pub mod gateway;
pub mod session;

pub use api::{ChatApi, HttpChatApi};
pub use error::ClientError;
pub use gateway::GatewayListener;
pub use session::{AwaitingMessage, ChatSession, Notice, Outcome};
