use std::fmt;

use serde::Serialize;
use ts_rs::TS;

/// Structured error type for the application. Replaces stringly-typed errors
/// so the frontend can match on error codes and display appropriate UI.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "code", content = "detail")]
#[ts(export)]
pub enum AppError {
    /// A parsed command name resolved to no registered plugin. Scoped to a
    /// single occurrence; sibling occurrences keep dispatching.
    UnknownCommand { command: String },
    /// A plugin handler rejected (network failure, evaluation error, non-2xx
    /// upstream response).
    HandlerFailure { plugin_id: String, message: String },
    /// A plugin handler exceeded its declared time budget. Treated as a
    /// handler failure for propagation purposes.
    Timeout { plugin_id: String, limit_ms: u64 },
    /// A substitution span does not fit the message text it claims to
    /// describe. Indicates parser/record desynchronization; fatal to the
    /// merge, never silently truncated.
    InvalidSpan { start: usize, end: usize, len: usize },
    /// A command's argument scan never saw its matching `)`. Only produced
    /// under the opt-in error policy; the default policy discards silently.
    UnterminatedCommand { start: usize },
    /// A plugin with the same id or invocation name is already registered.
    DuplicatePlugin { what: String },
    NotFound { what: String },
    Validation { message: String },
    Io { message: String },
    Json { message: String },
    /// Upstream HTTP error (LLM provider or a plugin's own calls).
    Api { message: String },
    NoSettings,
}

impl AppError {
    /// Convenience constructor for plugin-side failures.
    pub fn handler(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::HandlerFailure {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    /// True for failures attributable to a single dispatched occurrence
    /// (the occurrence stays unresolved; siblings are unaffected).
    pub fn is_handler_failure(&self) -> bool {
        matches!(
            self,
            AppError::HandlerFailure { .. } | AppError::Timeout { .. }
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::UnknownCommand { command } => write!(f, "Unknown command: {command}"),
            AppError::HandlerFailure { plugin_id, message } => {
                write!(f, "Plugin {plugin_id} failed: {message}")
            }
            AppError::Timeout { plugin_id, limit_ms } => {
                write!(f, "Plugin {plugin_id} timed out after {limit_ms}ms")
            }
            AppError::InvalidSpan { start, end, len } => {
                write!(
                    f,
                    "Invalid substitution span {start}..{end} for text of length {len}"
                )
            }
            AppError::UnterminatedCommand { start } => {
                write!(f, "Unterminated command starting at index {start}")
            }
            AppError::DuplicatePlugin { what } => {
                write!(f, "A plugin with {what} is already registered")
            }
            AppError::NotFound { what } => write!(f, "{what} not found"),
            AppError::Validation { message } => write!(f, "{message}"),
            AppError::Io { message } => write!(f, "I/O error: {message}"),
            AppError::Json { message } => write!(f, "JSON error: {message}"),
            AppError::Api { message } => write!(f, "API error: {message}"),
            AppError::NoSettings => write!(f, "Settings not initialized"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json {
            message: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Api {
            message: e.to_string(),
        }
    }
}

/// Allow converting AppError to String for callers that only report text.
impl From<AppError> for String {
    fn from(e: AppError) -> String {
        e.to_string()
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Validation { message: s }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Validation {
            message: s.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn timeout_counts_as_handler_failure() {
        let e = AppError::Timeout {
            plugin_id: "atmark.js".to_string(),
            limit_ms: 10_000,
        };
        assert!(e.is_handler_failure());
        let unknown = AppError::UnknownCommand {
            command: "X".to_string(),
        };
        assert!(!unknown.is_handler_failure());
    }

    #[test]
    fn serializes_with_code_and_detail() {
        let e = AppError::UnknownCommand {
            command: "Frob".to_string(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["code"], "UnknownCommand");
        assert_eq!(json["detail"]["command"], "Frob");
    }
}
