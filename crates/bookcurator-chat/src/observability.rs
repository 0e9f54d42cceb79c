use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool;

/// Used when neither `BOOKCURATOR_LOG_LEVEL` nor `RUST_LOG` is set. The HTTP
/// stack logs every connection at `info`, which drowns the chat events.
pub const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn";
const DEFAULT_JSON_LOG_FILE: &str = "bookcurator.logs.jsonl";

static INIT: OnceCell<LogSettings> = OnceCell::new();

/// Where log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    /// No subscriber is installed.
    Disabled,
    /// Compact lines on stderr; stdout belongs to the streamed reply.
    Console,
    /// JSON lines appended to this file.
    JsonFile(PathBuf),
}

/// Logging setup resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub sink: LogSink,
    pub filter: String,
}

impl LogSettings {
    /// Reads:
    /// - `BOOKCURATOR_OBSERVABILITY`: `0`/`false`/`off` disables logging.
    /// - `BOOKCURATOR_LOG_LEVEL`, then `RUST_LOG`: filter directives.
    /// - `BOOKCURATOR_JSON_LOG_PATH`: JSON lines to a file instead of stderr.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let filter = non_blank("BOOKCURATOR_LOG_LEVEL")
            .or_else(|| non_blank("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let enabled = non_blank("BOOKCURATOR_OBSERVABILITY")
            .and_then(|value| parse_bool(&value))
            .unwrap_or(true);
        let sink = if !enabled {
            LogSink::Disabled
        } else if let Some(path) = non_blank("BOOKCURATOR_JSON_LOG_PATH") {
            LogSink::JsonFile(PathBuf::from(path))
        } else {
            LogSink::Console
        };
        Self { sink, filter }
    }

    // Invalid directives fall back to the default rather than silencing logs.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs the global `tracing` subscriber once per process and returns the
/// settings it was installed with. Later calls return the first result.
pub fn init_observability() -> &'static LogSettings {
    INIT.get_or_init(|| {
        let settings = LogSettings::from_env();
        install(&settings);
        settings
    })
}

fn install(settings: &LogSettings) {
    match &settings.sink {
        LogSink::Disabled => {}
        LogSink::Console => {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(settings.env_filter())
                .with(console_layer)
                .try_init();
        }
        LogSink::JsonFile(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let _ = std::fs::create_dir_all(&dir);
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_JSON_LOG_FILE);
            let writer = tracing_appender::rolling::never(&dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(settings.env_filter())
                .with(json_layer)
                .try_init();
        }
    }
}
