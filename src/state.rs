//! Shared application state.
//!
//! One `AppState` lives behind an `Arc` for the lifetime of the process; the
//! HTTP handlers and the CLI both go through it. Mutable pieces sit behind
//! their own locks with `with_*` helpers so no lock guard ever crosses an
//! await point.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chat::ChatManager;
use crate::error::AppError;
use crate::llm::LlmClient;
use crate::paths;
use crate::plugin::PluginRegistry;
use crate::plugins;
use crate::settings::{AppSettings, LlmConfig};
use crate::store::Store;

pub struct AppState {
    pub registry: Arc<PluginRegistry>,
    store: Mutex<Store>,
    settings: Mutex<Option<AppSettings>>,
    pub llm: Arc<LlmClient>,
    pub chat: ChatManager,
    config_dir: PathBuf,
    api_port: AtomicU16,
}

impl AppState {
    /// Load persisted state from `config_dir` and wire up the stock plugins.
    pub fn initialize(config_dir: PathBuf) -> Result<Self, AppError> {
        let settings = crate::settings::load_settings(&config_dir)?;
        let llm_config = settings
            .as_ref()
            .map_or_else(LlmConfig::default, |s| s.llm.clone());
        let llm = Arc::new(LlmClient::new(llm_config));
        let registry = Arc::new(plugins::stock_registry(
            &llm,
            paths::scratch_dir(&config_dir),
        )?);

        let mut store = Store::load(&config_dir)?;
        store.ensure_plugin_states(&registry);

        Ok(Self {
            registry,
            store: Mutex::new(store),
            settings: Mutex::new(settings),
            llm,
            chat: ChatManager::new(),
            config_dir,
            api_port: AtomicU16::new(0),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        f(&self.store.lock())
    }

    pub fn with_store_mut<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        f(&mut self.store.lock())
    }

    /// Mutate the store and persist it in one step.
    pub fn update_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> Result<R, AppError> {
        let mut store = self.store.lock();
        let result = f(&mut store);
        store.save(&self.config_dir)?;
        Ok(result)
    }

    pub fn with_settings<R>(&self, f: impl FnOnce(Option<&AppSettings>) -> R) -> R {
        f(self.settings.lock().as_ref())
    }

    /// Replace the settings, persist them, and propagate the provider config
    /// to the completion client.
    pub fn save_settings(&self, settings: AppSettings) -> Result<(), AppError> {
        crate::settings::save_settings(&self.config_dir, &settings)?;
        self.llm.update_config(settings.llm.clone());
        *self.settings.lock() = Some(settings);
        Ok(())
    }

    pub fn set_api_port(&self, port: u16) {
        self.api_port.store(port, Ordering::SeqCst);
    }

    pub fn api_port(&self) -> u16 {
        self.api_port.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn initializes_fresh_with_stock_plugins_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::initialize(dir.path().to_path_buf()).unwrap();
        assert_eq!(state.registry.plugins().len(), 4);
        state.with_store(|store| {
            assert!(store.plugin_state("atmark.js").is_some());
            assert!(store.plugin_state("atmark.google").is_some());
            assert_eq!(store.conversations.len(), 1);
        });
    }

    #[test]
    fn update_store_persists_across_reinitialization() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::initialize(dir.path().to_path_buf()).unwrap();
        let conversation = state.with_store(|s| s.active.clone());
        state
            .update_store(|s| s.add_question(&conversation, "persisted?"))
            .unwrap()
            .unwrap();

        let reloaded = AppState::initialize(dir.path().to_path_buf()).unwrap();
        reloaded.with_store(|store| {
            assert_eq!(store.conversation(&conversation).unwrap().messages.len(), 1);
        });
    }

    #[test]
    fn saving_settings_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::initialize(dir.path().to_path_buf()).unwrap();
        let mut settings = AppSettings::default();
        settings.llm.api_key = Some("sk-test".to_string());
        state.save_settings(settings).unwrap();

        let reloaded = AppState::initialize(dir.path().to_path_buf()).unwrap();
        reloaded.with_settings(|s| {
            assert_eq!(s.unwrap().llm.api_key.as_deref(), Some("sk-test"));
        });
    }
}
