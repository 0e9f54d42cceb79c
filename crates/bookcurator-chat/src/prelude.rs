//! Common imports for wiring a chat front end.
pub use crate::{
    AbortHandle, ChatController, ChatError, ChatMessage, ChatSnapshot, ClientConfig,
    HttpRecommendBackend, JsonFileStore, KeyValueStore, MemoryStore, RecommendBackend, Role,
    SendOutcome, StreamEvent,
};
