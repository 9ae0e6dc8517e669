pub mod auth;
pub mod chats;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiJson};
pub use routes::router;
pub use state::{AppState, AppStateInner};
