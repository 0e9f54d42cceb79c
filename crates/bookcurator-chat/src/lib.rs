//! Streaming chat core for the BookCurator recommendation assistant.
//!
//! A [`ChatController`] owns the conversation. Each query opens one NDJSON
//! stream from the recommendation gateway; decoded [`StreamEvent`]s are merged
//! into the newest assistant message as they arrive, and every change is
//! published as a [`ChatSnapshot`] for the UI to render.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bookcurator_chat::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let backend = HttpRecommendBackend::new(ClientConfig::default())?;
//! let store = Arc::new(MemoryStore::new());
//! let mut chat = ChatController::new(Arc::new(backend), store);
//! chat.set_credential("my-google-api-key")?;
//!
//! chat.send_message("요즘 인기 있는 소설 알려줘").await;
//! if let Some(reply) = chat.messages().last() {
//!     println!("{}", reply.content);
//! }
//! # Ok(())
//! # }
//! ```

/// Recommendation gateway client and backend seam.
pub mod client;
/// Environment and `.env` helpers.
pub mod config;
/// Session controller that applies stream events to the conversation.
pub mod controller;
/// Incremental NDJSON decoding.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Wire events and the book/source records they carry.
pub mod event;
/// Chat messages and their merge rules.
pub mod message;
/// Process-wide `tracing` setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Key-value persistence and session history.
pub mod store;

pub use client::{ClientConfig, HttpRecommendBackend, RecommendBackend, RecommendRequest};
pub use controller::{AbortHandle, ChatController, ChatSnapshot, SendOutcome};
pub use decoder::{EventStream, NdjsonDecoder, decode_stream};
pub use errors::{ChatError, StoreError, TransportError};
pub use event::{BookRecord, SourceRecord, StreamEvent};
pub use message::{ChatMessage, Role};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, SessionHistory, SessionSummary};
