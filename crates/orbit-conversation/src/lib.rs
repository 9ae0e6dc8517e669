pub mod generation;
pub mod history;
pub mod locks;
pub mod service;

pub use generation::{GenerationError, GenerationRequest, Generator, HttpGenerator, TokenSink};
pub use history::{DEFAULT_HISTORY_WINDOW, generation_window};
pub use locks::ChatLocks;
pub use service::{APOLOGY, ConversationService, ConversationSettings, ServiceError, apology};
