//! Stock plugins shipped with the application.

pub mod fetch;
pub mod google;
pub mod html;
pub mod js;

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::AppError;
use crate::llm::LlmClient;
use crate::plugin::PluginRegistry;

/// Build a registry holding every stock plugin, in their canonical order.
pub fn stock_registry(
    llm: &Arc<LlmClient>,
    scratch_dir: PathBuf,
) -> Result<PluginRegistry, AppError> {
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(js::JsPlugin::new()))?;
    registry.register(Arc::new(google::GooglePlugin::new(Arc::clone(llm))))?;
    registry.register(Arc::new(fetch::FetchPlugin::new(Arc::clone(llm))))?;
    registry.register(Arc::new(html::HtmlPlugin::new(scratch_dir)))?;
    Ok(registry)
}
