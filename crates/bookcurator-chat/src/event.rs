use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recommended book attached to an assistant message.
///
/// The payload is model-generated JSON and is kept exactly as received, so a
/// field with an unexpected type never costs the user the whole list. The
/// accessors read the common fields leniently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookRecord(Value);

impl BookRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Backend id; numeric ids are rendered as their decimal string.
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.0.get("title")?.as_str()
    }

    pub fn author(&self) -> Option<&str> {
        self.0.get("author")?.as_str()
    }

    pub fn rating(&self) -> Option<f64> {
        lenient_number(self.0.get("rating")?)
    }

    /// Rank in `store` (`kyobo`, `millie`, `aladdin`, ...), when the backend
    /// reported one.
    pub fn rank(&self, store: &str) -> Option<f64> {
        lenient_number(self.0.get("rankings")?.get(store)?)
    }

    /// Any other field, untouched.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// A citation telling the user which store ranking backed the answer.
///
/// Kept as received, like [`BookRecord`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(Value);

impl SourceRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn store(&self) -> Option<&str> {
        self.0.get("store")?.as_str()
    }

    pub fn category(&self) -> Option<&str> {
        self.0.get("category")?.as_str()
    }

    /// Confidence in percent, nominally `0..=100`.
    pub fn confidence(&self) -> Option<f64> {
        lenient_number(self.0.get("confidence")?)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

// Models sometimes quote numbers.
fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One decoded line of the recommendation stream.
///
/// On the wire every line is `{"type": "...", "data": ...}`; the shape of
/// `data` depends on `type`, so each variant carries its own payload.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Text fragment appended to the assistant reply.
    Text(String),
    /// Full list of recommended books; replaces any previous list.
    Books(Vec<BookRecord>),
    /// Full list of citations; replaces any previous list.
    Sources(Vec<SourceRecord>),
    /// Backend finished successfully.
    Done,
    /// Backend failed. The message is for logs only.
    Error(Option<String>),
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl StreamEvent {
    /// Parses one NDJSON line.
    ///
    /// Returns `None` for blank lines, invalid JSON, unknown `type` values, and
    /// payloads whose shape does not match their `type`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let wire: WireEvent = serde_json::from_str(line).ok()?;
        Self::from_wire(wire)
    }

    fn from_wire(wire: WireEvent) -> Option<Self> {
        match wire.kind.as_str() {
            "text" => match wire.data {
                Value::String(text) => Some(Self::Text(text)),
                _ => None,
            },
            "books" => match wire.data {
                Value::Array(items) => Some(Self::Books(items.into_iter().map(BookRecord).collect())),
                _ => None,
            },
            "sources" => match wire.data {
                Value::Array(items) => {
                    Some(Self::Sources(items.into_iter().map(SourceRecord).collect()))
                }
                _ => None,
            },
            "done" => Some(Self::Done),
            "error" => Some(Self::Error(wire.data.as_str().map(ToOwned::to_owned))),
            _ => None,
        }
    }

    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Books(_) => "books",
            Self::Sources(_) => "sources",
            Self::Done => "done",
            Self::Error(_) => "error",
        }
    }

    /// True for `Done` and `Error`, after which a send is settled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_terminal_events() {
        assert_eq!(
            StreamEvent::parse_line(r#"{"type":"text","data":"안녕"}"#),
            Some(StreamEvent::Text("안녕".into()))
        );
        assert_eq!(
            StreamEvent::parse_line(r#"{"type":"done","data":null}"#),
            Some(StreamEvent::Done)
        );
        assert_eq!(
            StreamEvent::parse_line(r#"  {"type":"done"}  "#),
            Some(StreamEvent::Done)
        );
        assert_eq!(
            StreamEvent::parse_line(r#"{"type":"error","data":"quota exceeded"}"#),
            Some(StreamEvent::Error(Some("quota exceeded".into())))
        );
        assert_eq!(
            StreamEvent::parse_line(r#"{"type":"error","data":null}"#),
            Some(StreamEvent::Error(None))
        );
    }

    #[test]
    fn parses_books_with_numeric_ids_and_rankings() {
        let line = r##"{"type":"books","data":[{"id":7,"title":"T","author":"A","cover_color":"#5B8FA8","rankings":{"kyobo":3,"aladdin":1},"unknown":true}]}"##;
        let Some(StreamEvent::Books(books)) = StreamEvent::parse_line(line) else {
            panic!("expected books event");
        };
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id().as_deref(), Some("7"));
        assert_eq!(books[0].title(), Some("T"));
        assert_eq!(
            books[0].field("cover_color").and_then(Value::as_str),
            Some("#5B8FA8")
        );
        assert_eq!(books[0].rank("aladdin"), Some(1.0));
        assert_eq!(books[0].field("unknown"), Some(&Value::Bool(true)));
        assert_eq!(books[0].field("genre"), None);
    }

    #[test]
    fn keeps_records_with_unexpected_field_types() {
        let line = r#"{"type":"books","data":[{"id":"b-1","title":"T","rating":"4.5","rankings":{"millie":null,"kyobo":"2"}},{"note":"no title"}]}"#;
        let Some(StreamEvent::Books(books)) = StreamEvent::parse_line(line) else {
            panic!("expected books event");
        };
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].rating(), Some(4.5));
        assert_eq!(books[0].rank("millie"), None);
        assert_eq!(books[0].rank("kyobo"), Some(2.0));
        assert_eq!(books[1].title(), None);
        assert_eq!(
            books[1].as_value(),
            &serde_json::json!({"note": "no title"})
        );

        let line = r#"{"type":"sources","data":[{"store":"kyobo","category":"소설","confidence":95.5},{"store":"millie"}]}"#;
        let Some(StreamEvent::Sources(sources)) = StreamEvent::parse_line(line) else {
            panic!("expected sources event");
        };
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].confidence(), Some(95.5));
        assert_eq!(sources[1].category(), None);
    }

    #[test]
    fn records_serialize_exactly_as_received() {
        let raw = serde_json::json!({"id": 3, "title": "T", "rating": "4.5", "extra": [1, 2]});
        let book = BookRecord::new(raw.clone());
        assert_eq!(serde_json::to_value(&book).expect("serialize"), raw);
        assert_eq!(book.into_value(), raw);
    }

    #[test]
    fn parses_sources() {
        let line = r#"{"type":"sources","data":[{"store":"millie","category":"소설","confidence":87}]}"#;
        let Some(StreamEvent::Sources(sources)) = StreamEvent::parse_line(line) else {
            panic!("expected sources event");
        };
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].store(), Some("millie"));
        assert_eq!(sources[0].category(), Some("소설"));
        assert_eq!(sources[0].confidence(), Some(87.0));
    }

    #[test]
    fn rejects_malformed_and_mismatched_lines() {
        assert_eq!(StreamEvent::parse_line(""), None);
        assert_eq!(StreamEvent::parse_line("   "), None);
        assert_eq!(StreamEvent::parse_line(r#"{"type":"text","data":"#), None);
        assert_eq!(StreamEvent::parse_line(r#"{"type":"text","data":3}"#), None);
        assert_eq!(StreamEvent::parse_line(r#"{"type":"books","data":"x"}"#), None);
        assert_eq!(StreamEvent::parse_line(r#"{"type":"usage","data":{}}"#), None);
        assert_eq!(StreamEvent::parse_line(r#"{"data":"no type"}"#), None);
        assert_eq!(StreamEvent::parse_line("[1,2,3]"), None);
    }

    #[test]
    fn terminal_helpers() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::Error(None).is_terminal());
        assert!(!StreamEvent::Text("a".into()).is_terminal());
        assert_eq!(StreamEvent::Books(Vec::new()).kind(), "books");
    }
}
