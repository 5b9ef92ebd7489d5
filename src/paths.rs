//! Well-known file names and directory resolution.

use std::path::{Path, PathBuf};

/// Settings document (provider config, everything non-secret).
pub const SETTINGS_FILE: &str = "settings.json";
/// API key storage, kept apart from settings so the settings file can be
/// shared or synced without leaking credentials.
pub const CREDENTIALS_FILE: &str = "credentials.json";
/// Conversation store (conversations, messages, plugin states).
pub const CONVERSATIONS_FILE: &str = "conversations.json";
/// Port the HTTP API bound to, written on startup for local tooling.
pub const PORT_FILE: &str = ".atmark-port";
/// Scratch space for ephemeral plugin artifacts (rendered HTML files).
pub const SCRATCH_DIR: &str = ".scratch";

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE)
}

pub fn credentials_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CREDENTIALS_FILE)
}

pub fn conversations_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONVERSATIONS_FILE)
}

pub fn port_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(PORT_FILE)
}

pub fn scratch_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(SCRATCH_DIR)
}

/// Resolve the config directory: explicit env override, then the user's
/// config root, then the working directory as a last resort.
pub fn default_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ATMARK_CONFIG_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home).join(".config").join("atmark");
        }
    }
    PathBuf::from(".atmark")
}
