use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::{DEFAULT_MAX_BOOKS, RecommendBackend, RecommendRequest};
use crate::errors::{ChatError, TransportError};
use crate::event::StreamEvent;
use crate::message::{
    CONNECTION_FAILURE_NOTICE, ChatMessage, MISSING_CREDENTIAL_NOTICE, last_assistant_index,
    last_assistant_mut,
};
use crate::store::{KeyValueStore, SessionHistory, SessionSummary};

/// Handle used to cancel the in-flight send.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation of the send currently streaming, if any.
    ///
    /// The aborted send settles like a transport failure: the assistant
    /// message gets the connection-failure notice and stops streaming.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// What the presentation layer observes after every change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatSnapshot {
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
    pub session_id: Option<String>,
}

/// How a call to [`ChatController::send_message`] ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The query was blank; nothing changed.
    Skipped,
    /// No API key is configured; the backend was not contacted.
    MissingCredential,
    /// The backend sent `done`.
    Completed,
    /// The stream ended without a terminal event.
    EndedWithoutDone,
    /// The backend sent an `error` event.
    BackendError,
    /// The request or stream failed, or the send was aborted.
    TransportFailed(TransportError),
}

/// Owns the conversation and drives one recommendation stream at a time.
///
/// `send_message` takes `&mut self`, so two sends on one controller cannot
/// overlap. A send whose future is dropped mid-stream leaves its message
/// streaming; the next `send_message`, `new_chat`, or `select_session`
/// settles it with the connection-failure notice.
pub struct ChatController {
    backend: Arc<dyn RecommendBackend>,
    history: SessionHistory,
    max_books: u8,
    messages: Vec<ChatMessage>,
    is_loading: bool,
    session_id: Option<String>,
    state_tx: watch::Sender<ChatSnapshot>,
    abort_tx: watch::Sender<bool>,
}

impl ChatController {
    pub fn new(backend: Arc<dyn RecommendBackend>, store: Arc<dyn KeyValueStore>) -> Self {
        let (state_tx, _) = watch::channel(ChatSnapshot::default());
        let (abort_tx, _) = watch::channel(false);
        Self {
            backend,
            history: SessionHistory::new(store),
            max_books: DEFAULT_MAX_BOOKS,
            messages: Vec::new(),
            is_loading: false,
            session_id: None,
            state_tx,
            abort_tx,
        }
    }

    /// Sets the book count sent with every request.
    pub fn max_books(mut self, max_books: u8) -> Self {
        self.max_books = max_books;
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Id of the persisted session the conversation is saved under.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Returns a receiver that sees a fresh snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.abort_tx.clone(),
        }
    }

    pub fn sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        Ok(self.history.list()?)
    }

    /// Stores the backend API key; a blank key clears it.
    pub fn set_credential(&self, key: &str) -> Result<(), ChatError> {
        Ok(self.history.set_credential(key)?)
    }

    /// Sends `query` and streams the reply into a new assistant message.
    ///
    /// Every failure is settled into the message list; `is_loading` is false
    /// when this returns.
    pub async fn send_message(&mut self, query: &str) -> SendOutcome {
        let query = query.trim();
        if query.is_empty() {
            return SendOutcome::Skipped;
        }
        self.settle_stale();

        self.messages.push(ChatMessage::user(query));
        self.messages.push(ChatMessage::assistant_placeholder());
        self.is_loading = true;
        self.publish();

        let credential = self.history.credential().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read API key");
            None
        });
        let Some(api_key) = credential else {
            info!("no API key configured, skipping recommend request");
            self.update_last_assistant(|message| {
                message.content = MISSING_CREDENTIAL_NOTICE.to_string();
                message.is_streaming = false;
            });
            self.finish_send();
            return SendOutcome::MissingCredential;
        };
        self.persist();

        let request = RecommendRequest::new(query, api_key).max_books(self.max_books);
        let outcome = self.stream_reply(request).await;
        self.finish_send();
        outcome
    }

    async fn stream_reply(&mut self, request: RecommendRequest) -> SendOutcome {
        self.abort_tx.send_replace(false);
        let mut abort_rx = self.abort_tx.subscribe();
        let backend = self.backend.clone();

        let opened = tokio::select! {
            opened = backend.open_stream(request) => opened,
            _ = aborted(&mut abort_rx) => Err(TransportError::Aborted),
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(err) => return self.fail_transport(err),
        };

        let mut seq = 0_u64;
        loop {
            let next = tokio::select! {
                next = events.next() => next,
                _ = aborted(&mut abort_rx) => Some(Err(TransportError::Aborted)),
            };
            match next {
                Some(Ok(event)) => {
                    debug!(session_id = ?self.session_id, seq, kind = event.kind(), "applying stream event");
                    seq = seq.saturating_add(1);
                    self.update_last_assistant(|message| message.apply(&event));
                    match event {
                        StreamEvent::Done => return SendOutcome::Completed,
                        StreamEvent::Error(detail) => {
                            warn!(detail = detail.as_deref().unwrap_or(""), "backend reported an error");
                            return SendOutcome::BackendError;
                        }
                        _ => {}
                    }
                }
                Some(Err(err)) => return self.fail_transport(err),
                None => {
                    debug!(seq, "stream ended without done");
                    self.update_last_assistant(|message| message.is_streaming = false);
                    return SendOutcome::EndedWithoutDone;
                }
            }
        }
    }

    /// Clears the conversation; the next send starts a new session.
    pub fn new_chat(&mut self) {
        self.settle_stale();
        self.messages.clear();
        self.session_id = None;
        self.is_loading = false;
        self.publish();
    }

    /// Replaces the conversation with a persisted session.
    pub fn select_session(&mut self, id: &str) -> Result<(), ChatError> {
        let mut messages = self
            .history
            .load_messages(id)?
            .ok_or_else(|| ChatError::SessionNotFound { id: id.to_string() })?;
        // Nothing loaded from disk can still be in flight.
        for message in &mut messages {
            message.is_streaming = false;
        }

        self.settle_stale();
        self.messages = messages;
        self.session_id = Some(id.to_string());
        self.is_loading = false;
        self.publish();
        Ok(())
    }

    /// Deletes a persisted session, clearing the conversation if it is open.
    pub fn delete_session(&mut self, id: &str) -> Result<(), ChatError> {
        self.history.delete(id)?;
        if self.session_id.as_deref() == Some(id) {
            self.messages.clear();
            self.session_id = None;
            self.is_loading = false;
            self.publish();
        }
        Ok(())
    }

    fn fail_transport(&mut self, err: TransportError) -> SendOutcome {
        warn!(error = %err, "recommend stream failed");
        self.update_last_assistant(|message| message.fail(CONNECTION_FAILURE_NOTICE));
        SendOutcome::TransportFailed(err)
    }

    fn settle_stale(&mut self) {
        let Some(message) = last_assistant_mut(&mut self.messages) else {
            return;
        };
        if !message.is_streaming {
            return;
        }
        info!(message_id = %message.id, "settling message left streaming by a dropped send");
        message.fail(CONNECTION_FAILURE_NOTICE);
        self.is_loading = false;
        self.persist();
        self.publish();
    }

    fn finish_send(&mut self) {
        self.is_loading = false;
        self.persist();
        self.publish();
    }

    // Streaming updates touch one message, so only that message is copied into
    // the published snapshot instead of the whole history.
    fn update_last_assistant(&mut self, f: impl FnOnce(&mut ChatMessage)) {
        let Some(idx) = last_assistant_index(&self.messages) else {
            warn!("no assistant message to update");
            self.publish();
            return;
        };
        f(&mut self.messages[idx]);

        let messages = &self.messages;
        let is_loading = self.is_loading;
        let session_id = &self.session_id;
        self.state_tx.send_modify(|snapshot| {
            let in_sync = snapshot.messages.len() == messages.len()
                && snapshot.messages[idx].id == messages[idx].id;
            if in_sync {
                snapshot.messages[idx].clone_from(&messages[idx]);
            } else {
                snapshot.messages.clone_from(messages);
            }
            snapshot.is_loading = is_loading;
            snapshot.session_id.clone_from(session_id);
        });
    }

    fn persist(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        let result = match self.session_id.clone() {
            Some(id) => self.history.save_messages(&id, &self.messages),
            None => self.history.create(&self.messages).map(|summary| {
                debug!(session_id = %summary.id, title = %summary.title, "created chat session");
                self.session_id = Some(summary.id);
            }),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist chat session");
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(ChatSnapshot {
            messages: self.messages.clone(),
            is_loading: self.is_loading,
            session_id: self.session_id.clone(),
        });
    }
}

async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
