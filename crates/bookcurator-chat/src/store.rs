//! Local key-value persistence for the API key and chat history.
//!
//! Layout (string keys, JSON string values):
//! - `google_api_key`: the backend credential.
//! - `book_curator_history`: `SessionSummary` list, newest first.
//! - `book_curator_session_{id}`: the `ChatMessage` list of one session.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::StoreError;
use crate::message::{ChatMessage, Role};

pub const CREDENTIAL_KEY: &str = "google_api_key";
pub const HISTORY_KEY: &str = "book_curator_history";
const SESSION_KEY_PREFIX: &str = "book_curator_session_";
const TITLE_MAX_CHARS: usize = 25;
const UNTITLED_SESSION: &str = "새로운 대화";

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process store, mostly for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file, rewritten on every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) if data.trim().is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `f` to a copy, persists it, and only then swaps it in, so a
    /// failed write leaves both memory and disk at the previous state.
    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = entries.clone();
        f(&mut next);
        self.write_atomic(&next)?;
        *entries = next;
        Ok(())
    }

    // Write a sibling temp file and rename it over the target; a crash mid-write
    // never leaves a truncated store behind.
    fn write_atomic(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("json.tmp");
        let written = write_private(&temp_path, data.as_bytes())
            .and_then(|()| std::fs::rename(&temp_path, &self.path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

// The store holds the API key, so keep it owner-only where the platform allows.
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write as _;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }
}

/// Sidebar entry for one persisted conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
}

/// Typed view over the store: credential plus session history.
#[derive(Clone)]
pub struct SessionHistory {
    store: Arc<dyn KeyValueStore>,
}

impl SessionHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the configured API key; blank values count as missing.
    pub fn credential(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get(CREDENTIAL_KEY)?
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty()))
    }

    /// Stores the API key, or clears it when `key` is blank.
    pub fn set_credential(&self, key: &str) -> Result<(), StoreError> {
        let key = key.trim();
        if key.is_empty() {
            self.store.remove(CREDENTIAL_KEY)
        } else {
            self.store.set(CREDENTIAL_KEY, key)
        }
    }

    /// Lists sessions newest first. An unreadable history reads as empty.
    pub fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let Some(raw) = self.store.get(HISTORY_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(sessions) => Ok(sessions),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable session history");
                Ok(Vec::new())
            }
        }
    }

    /// Registers a new session titled after its first message and saves the
    /// messages under it.
    pub fn create(&self, messages: &[ChatMessage]) -> Result<SessionSummary, StoreError> {
        let mut sessions = self.list()?;
        let date = Utc::now();
        let mut millis = date.timestamp_millis();
        while sessions.iter().any(|s| s.id == millis.to_string()) {
            millis += 1;
        }
        let summary = SessionSummary {
            id: millis.to_string(),
            title: session_title(messages.first()),
            date,
        };
        sessions.insert(0, summary.clone());
        self.store.set(HISTORY_KEY, &serde_json::to_string(&sessions)?)?;
        self.save_messages(&summary.id, messages)?;
        Ok(summary)
    }

    pub fn save_messages(&self, id: &str, messages: &[ChatMessage]) -> Result<(), StoreError> {
        self.store
            .set(&session_key(id), &serde_json::to_string(messages)?)
    }

    /// Loads a session's messages; `None` when nothing is stored under `id`.
    pub fn load_messages(&self, id: &str) -> Result<Option<Vec<ChatMessage>>, StoreError> {
        match self.store.get(&session_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Removes a session's summary and messages.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut sessions = self.list()?;
        sessions.retain(|s| s.id != id);
        self.store.set(HISTORY_KEY, &serde_json::to_string(&sessions)?)?;
        self.store.remove(&session_key(id))
    }
}

fn session_key(id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

fn session_title(first: Option<&ChatMessage>) -> String {
    match first {
        Some(message) if message.role == Role::User => {
            let mut title: String = message.content.chars().take(TITLE_MAX_CHARS).collect();
            if message.content.chars().count() > TITLE_MAX_CHARS {
                title.push_str("...");
            }
            title
        }
        _ => UNTITLED_SESSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> SessionHistory {
        SessionHistory::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn credential_treats_blank_as_missing() {
        let history = history();
        assert_eq!(history.credential().expect("read"), None);
        history.set_credential("  abc  ").expect("write");
        assert_eq!(history.credential().expect("read").as_deref(), Some("abc"));
        history.set_credential("   ").expect("clear");
        assert_eq!(history.credential().expect("read"), None);
    }

    #[test]
    fn create_lists_newest_first_with_unique_ids() {
        let history = history();
        let first = history
            .create(&[ChatMessage::user("첫 번째 질문")])
            .expect("create");
        let second = history
            .create(&[ChatMessage::user("두 번째 질문")])
            .expect("create");
        assert_ne!(first.id, second.id);

        let sessions = history.list().expect("list");
        assert_eq!(sessions, vec![second, first]);
    }

    #[test]
    fn titles_are_truncated_to_25_characters() {
        let long = "가".repeat(30);
        assert_eq!(
            session_title(Some(&ChatMessage::user(long))),
            format!("{}...", "가".repeat(25))
        );
        assert_eq!(
            session_title(Some(&ChatMessage::user("짧은 질문"))),
            "짧은 질문"
        );
        assert_eq!(
            session_title(Some(&ChatMessage::assistant_placeholder())),
            UNTITLED_SESSION
        );
        assert_eq!(session_title(None), UNTITLED_SESSION);
    }

    #[test]
    fn messages_round_trip_and_delete_removes_everything() {
        let history = history();
        let messages = vec![ChatMessage::user("q"), ChatMessage::assistant_placeholder()];
        let summary = history.create(&messages).expect("create");
        assert_eq!(
            history.load_messages(&summary.id).expect("load"),
            Some(messages)
        );

        history.delete(&summary.id).expect("delete");
        assert!(history.list().expect("list").is_empty());
        assert_eq!(history.load_messages(&summary.id).expect("load"), None);
    }

    #[test]
    fn unreadable_history_reads_as_empty_but_corrupt_session_errors() {
        let store = Arc::new(MemoryStore::new());
        store.set(HISTORY_KEY, "not json").expect("set");
        store.set(&session_key("1"), "{broken").expect("set");
        let history = SessionHistory::new(store);
        assert!(history.list().expect("list").is_empty());
        assert!(matches!(
            history.load_messages("1"),
            Err(StoreError::Serde(_))
        ));
    }

    #[test]
    fn json_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("store.json");

        let store = JsonFileStore::open(&path).expect("open");
        store.set(CREDENTIAL_KEY, "secret").expect("set");
        store.set("other", "value").expect("set");
        store.remove("other").expect("remove");
        drop(store);

        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.get(CREDENTIAL_KEY).expect("get").as_deref(),
            Some("secret")
        );
        assert_eq!(reopened.get("other").expect("get"), None);
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = JsonFileStore::open(&path).expect("open");
        store.set(CREDENTIAL_KEY, "old").expect("set");

        // A directory at the target makes the rename fail.
        std::fs::remove_file(&path).expect("remove file");
        std::fs::create_dir(&path).expect("block path");

        assert!(matches!(
            store.set(CREDENTIAL_KEY, "new"),
            Err(StoreError::Io(_))
        ));
        assert!(store.remove(CREDENTIAL_KEY).is_err());
        assert_eq!(
            store.get(CREDENTIAL_KEY).expect("get").as_deref(),
            Some("old")
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = JsonFileStore::open(&path).expect("open");
        store.set("k", "v").expect("set");
        assert!(path.is_file());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
