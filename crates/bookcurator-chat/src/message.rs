use serde::{Deserialize, Serialize};

use crate::event::{BookRecord, SourceRecord, StreamEvent};

/// Shown instead of contacting the backend when no API key is configured.
pub const MISSING_CREDENTIAL_NOTICE: &str =
    "⚠️ Google API Key가 설정되지 않았습니다. 사이드바 하단 설정에서 API Key를 입력해주세요.";

/// Appended when the backend reports an `error` event.
pub const BACKEND_ERROR_NOTICE: &str = "\n\n⚠️ 오류가 발생했습니다. 잠시 후 다시 시도해주세요.";

/// Appended when the request or stream fails at the transport level.
pub const CONNECTION_FAILURE_NOTICE: &str = "⚠️ 서버 연결에 실패했습니다. 잠시 후 다시 시도해주세요.";

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation.
///
/// Serialized in camelCase so persisted sessions keep the `isStreaming` key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub books: Option<Vec<BookRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRecord>>,
    #[serde(default)]
    pub is_streaming: bool,
}

impl ChatMessage {
    /// Creates a settled user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), false)
    }

    /// Creates the empty, streaming assistant message a send fills in.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), true)
    }

    fn new(role: Role, content: String, is_streaming: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            books: None,
            sources: None,
            is_streaming,
        }
    }

    /// Applies one decoded event.
    ///
    /// Text is append-only; books and sources are replaced wholesale; terminal
    /// events clear the streaming flag.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Text(text) => self.content.push_str(text),
            StreamEvent::Books(books) => self.books = Some(books.clone()),
            StreamEvent::Sources(sources) => self.sources = Some(sources.clone()),
            StreamEvent::Done => self.is_streaming = false,
            StreamEvent::Error(_) => {
                self.content.push_str(BACKEND_ERROR_NOTICE);
                self.is_streaming = false;
            }
        }
    }

    /// Appends a failure notice and settles the message.
    ///
    /// Streamed text already present stays above the notice, separated by a
    /// blank line.
    pub fn fail(&mut self, notice: &str) {
        if !self.content.is_empty() {
            self.content.push_str("\n\n");
        }
        self.content.push_str(notice);
        self.is_streaming = false;
    }
}

/// Position of the most recent assistant message, scanning from the end.
pub fn last_assistant_index(messages: &[ChatMessage]) -> Option<usize> {
    messages
        .iter()
        .rposition(|message| message.role == Role::Assistant)
}

/// Finds the most recent assistant message by scanning from the end.
pub fn last_assistant_mut(messages: &mut [ChatMessage]) -> Option<&mut ChatMessage> {
    let idx = last_assistant_index(messages)?;
    messages.get_mut(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: &str) -> BookRecord {
        BookRecord::new(serde_json::json!({"id": id, "title": format!("title {id}"), "author": "author"}))
    }

    fn source(store: &str, confidence: u8) -> SourceRecord {
        SourceRecord::new(serde_json::json!({"store": store, "category": "종합", "confidence": confidence}))
    }

    #[test]
    fn text_appends_in_order_around_structured_events() {
        let mut message = ChatMessage::assistant_placeholder();
        message.apply(&StreamEvent::Text("올해 ".into()));
        message.apply(&StreamEvent::Books(vec![book("1")]));
        message.apply(&StreamEvent::Text("베스트".into()));
        message.apply(&StreamEvent::Sources(Vec::new()));
        message.apply(&StreamEvent::Text("셀러".into()));
        assert_eq!(message.content, "올해 베스트셀러");
        assert!(message.is_streaming);
    }

    #[test]
    fn books_and_sources_are_replaced_not_merged() {
        let mut message = ChatMessage::assistant_placeholder();
        message.apply(&StreamEvent::Books(vec![book("1"), book("2")]));
        message.apply(&StreamEvent::Books(vec![book("3")]));
        assert_eq!(message.books, Some(vec![book("3")]));

        let first = source("kyobo", 80);
        let second = source("aladdin", 60);
        message.apply(&StreamEvent::Sources(vec![first]));
        message.apply(&StreamEvent::Sources(vec![second.clone()]));
        assert_eq!(message.sources, Some(vec![second]));
    }

    #[test]
    fn terminal_events_settle_the_message() {
        let mut done = ChatMessage::assistant_placeholder();
        done.apply(&StreamEvent::Done);
        assert!(!done.is_streaming);
        assert!(done.content.is_empty());

        let mut failed = ChatMessage::assistant_placeholder();
        failed.apply(&StreamEvent::Text("partial".into()));
        failed.apply(&StreamEvent::Error(Some("boom".into())));
        assert!(!failed.is_streaming);
        assert_eq!(failed.content, format!("partial{BACKEND_ERROR_NOTICE}"));
    }

    #[test]
    fn fail_separates_notice_from_streamed_text() {
        let mut empty = ChatMessage::assistant_placeholder();
        empty.fail(CONNECTION_FAILURE_NOTICE);
        assert_eq!(empty.content, CONNECTION_FAILURE_NOTICE);
        assert!(!empty.is_streaming);

        let mut partial = ChatMessage::assistant_placeholder();
        partial.apply(&StreamEvent::Text("추천".into()));
        partial.fail(CONNECTION_FAILURE_NOTICE);
        assert_eq!(partial.content, format!("추천\n\n{CONNECTION_FAILURE_NOTICE}"));
    }

    #[test]
    fn last_assistant_is_found_from_the_end() {
        let mut messages = vec![
            ChatMessage::user("q1"),
            ChatMessage::assistant_placeholder(),
            ChatMessage::user("q2"),
            ChatMessage::assistant_placeholder(),
            ChatMessage::user("trailing"),
        ];
        let expected = messages[3].id.clone();
        let found = last_assistant_mut(&mut messages).expect("assistant present");
        assert_eq!(found.id, expected);

        let mut only_users = vec![ChatMessage::user("q")];
        assert!(last_assistant_mut(&mut only_users).is_none());
    }

    #[test]
    fn persisted_shape_uses_camel_case() {
        let message = ChatMessage::assistant_placeholder();
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["isStreaming"], true);
        assert!(value.get("books").is_none());

        let restored: ChatMessage = serde_json::from_value(serde_json::json!({
            "id": "user-1",
            "role": "user",
            "content": "hi"
        }))
        .expect("deserialize");
        assert_eq!(restored.role, Role::User);
        assert!(!restored.is_streaming);
    }
}
