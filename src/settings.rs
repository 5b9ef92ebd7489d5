//! Application settings with the API key split into a separate credentials
//! file.
//!
//! `settings.json` holds everything shareable; `credentials.json` holds the
//! provider key. Loading stitches the two together, and saving splits them
//! back apart. Older installations kept the key inline under
//! `openai_api_key`; loading migrates it to the credentials file once.

use std::path::Path;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::AppError;
use crate::paths;
use crate::storage;

pub const SETTINGS_VERSION: u32 = 1;

/// Completion provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Never serialized into settings.json; lives in the credentials file.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub temperature: Option<f64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: None,
            temperature: None,
        }
    }
}

/// Redacted view of the provider config, safe to hand to the frontend.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct LlmConfigInfo {
    pub has_api_key: bool,
    pub base_url: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

impl From<&LlmConfig> for LlmConfigInfo {
    fn from(config: &LlmConfig) -> Self {
        Self {
            has_api_key: config.api_key.as_deref().is_some_and(|k| !k.is_empty()),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Pre-split installs stored the key here. Read for migration, never
    /// written back.
    #[serde(skip_serializing, default)]
    pub openai_api_key: Option<String>,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            llm: LlmConfig::default(),
            openai_api_key: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Credentials {
    api_key: String,
}

pub fn load_api_key(config_dir: &Path) -> Result<Option<String>, AppError> {
    let credentials: Option<Credentials> =
        storage::read_json(&paths::credentials_path(config_dir))?;
    Ok(credentials.map(|c| c.api_key).filter(|k| !k.is_empty()))
}

pub fn save_api_key(config_dir: &Path, api_key: &str) -> Result<(), AppError> {
    storage::write_json(
        &paths::credentials_path(config_dir),
        &Credentials {
            api_key: api_key.to_string(),
        },
    )
}

/// Load settings and merge in the stored API key. `Ok(None)` on a fresh
/// installation with no settings file.
pub fn load_settings(config_dir: &Path) -> Result<Option<AppSettings>, AppError> {
    let Some(mut settings) =
        storage::read_json::<AppSettings>(&paths::settings_path(config_dir))?
    else {
        return Ok(None);
    };

    // One-time migration of the inline legacy key into the credentials file.
    if let Some(legacy) = settings.openai_api_key.take().filter(|k| !k.is_empty()) {
        if load_api_key(config_dir)?.is_none() {
            save_api_key(config_dir, &legacy)?;
        }
        // Rewrite settings.json without the inline key.
        storage::write_json(&paths::settings_path(config_dir), &settings)?;
    }

    settings.llm.api_key = load_api_key(config_dir)?;
    Ok(Some(settings))
}

/// Persist settings, splitting the API key out to the credentials file.
pub fn save_settings(config_dir: &Path, settings: &AppSettings) -> Result<(), AppError> {
    if let Some(key) = settings.llm.api_key.as_deref().filter(|k| !k.is_empty()) {
        save_api_key(config_dir, key)?;
    }
    storage::write_json(&paths::settings_path(config_dir), settings)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_settings(dir.path()).unwrap().is_none());
    }

    #[test]
    fn settings_round_trip_with_key_split_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = AppSettings::default();
        settings.llm.api_key = Some("sk-secret".to_string());
        settings.llm.model = Some("gpt-4o".to_string());
        save_settings(dir.path(), &settings).unwrap();

        // The key never lands in settings.json itself.
        let raw = std::fs::read_to_string(paths::settings_path(dir.path())).unwrap();
        assert!(!raw.contains("sk-secret"));

        let loaded = load_settings(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.llm.api_key.as_deref(), Some("sk-secret"));
        assert_eq!(loaded.llm.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn legacy_inline_key_migrates_to_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            paths::settings_path(dir.path()),
            serde_json::json!({
                "version": 1,
                "llm": { "base_url": "https://api.openai.com/v1" },
                "openai_api_key": "sk-legacy"
            })
            .to_string(),
        )
        .unwrap();

        let loaded = load_settings(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.llm.api_key.as_deref(), Some("sk-legacy"));
        assert_eq!(load_api_key(dir.path()).unwrap().as_deref(), Some("sk-legacy"));

        let raw = std::fs::read_to_string(paths::settings_path(dir.path())).unwrap();
        assert!(!raw.contains("sk-legacy"));
    }

    #[test]
    fn existing_credentials_win_over_a_legacy_key() {
        let dir = tempfile::tempdir().unwrap();
        save_api_key(dir.path(), "sk-current").unwrap();
        std::fs::write(
            paths::settings_path(dir.path()),
            serde_json::json!({ "version": 1, "openai_api_key": "sk-stale" }).to_string(),
        )
        .unwrap();

        let loaded = load_settings(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.llm.api_key.as_deref(), Some("sk-current"));
    }

    #[test]
    fn redacted_view_never_carries_the_key() {
        let config = LlmConfig {
            api_key: Some("sk-secret".to_string()),
            ..LlmConfig::default()
        };
        let info = LlmConfigInfo::from(&config);
        assert!(info.has_api_key);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
