//! Dispatch of parsed command occurrences to their plugin handlers.
//!
//! Each occurrence resolves to a plugin by invocation name and runs against a
//! snapshot of that plugin's state; all occurrences of an answer run
//! concurrently. Failures are isolated per occurrence: one handler rejecting
//! or timing out leaves its own record unresolved and every sibling
//! untouched.

use futures_util::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::AppError;
use crate::parser::Occurrence;
use crate::plugin::{Invocation, PluginRegistry};

fn default_true() -> bool {
    true
}

/// The outcome of one command occurrence, carrying everything needed to
/// splice the result back into the answer text later.
///
/// `start`/`end` are the occurrence's original byte span (`@` through the
/// matching `)`). `result` is `None` while the occurrence is pending or
/// failed; `error` explains a failure in frontend-displayable terms.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubstitutionRecord {
    pub plugin_id: String,
    pub start: usize,
    pub end: usize,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub result: Option<Value>,
    #[serde(default = "default_true")]
    pub should_persist: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

impl SubstitutionRecord {
    /// A record for an occurrence that has not run yet. Unknown commands use
    /// the raw command name as the plugin id so the span stays renderable.
    pub fn pending(plugin_id: impl Into<String>, occurrence: &Occurrence) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            start: occurrence.start,
            end: occurrence.end,
            query: occurrence.query.clone(),
            result: None,
            should_persist: true,
            error: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }
}

/// Run one occurrence through its plugin, enforcing the plugin's declared
/// time budget when it has one.
pub async fn dispatch(
    registry: &PluginRegistry,
    occurrence: &Occurrence,
    question: &str,
    state: &Value,
) -> Result<crate::plugin::PluginOutput, AppError> {
    let plugin = registry
        .by_command(&occurrence.name)
        .ok_or(AppError::UnknownCommand {
            command: occurrence.name.clone(),
        })?;

    let invocation = Invocation {
        query: occurrence.query.clone(),
        question: question.to_string(),
    };

    match plugin.timeout() {
        Some(limit) => tokio::time::timeout(limit, plugin.run(&invocation, state))
            .await
            .map_err(|_| AppError::Timeout {
                plugin_id: plugin.descriptor().id.clone(),
                limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })?,
        None => plugin.run(&invocation, state).await,
    }
}

/// Dispatch every occurrence of an answer concurrently against a snapshot of
/// the plugin states, producing one record per occurrence in input order.
///
/// Never fails as a whole: an occurrence whose command is unknown, whose
/// handler rejects, or whose handler runs past its budget yields a record
/// with `result: None` and the failure text in `error`.
pub async fn dispatch_all(
    registry: &PluginRegistry,
    occurrences: &[Occurrence],
    question: &str,
    states: &IndexMap<String, Value>,
) -> Vec<SubstitutionRecord> {
    let runs = occurrences.iter().map(|occurrence| async {
        let plugin_id = registry
            .by_command(&occurrence.name)
            .map_or_else(|| occurrence.name.clone(), |p| p.descriptor().id.clone());
        let state = states
            .get(&plugin_id)
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));

        let mut record = SubstitutionRecord::pending(plugin_id, occurrence);
        match dispatch(registry, occurrence, question, &state).await {
            Ok(output) => {
                record.result = Some(output.result);
                record.should_persist = output.should_persist;
            }
            Err(e) => {
                log::warn!("command @{}({}) failed: {e}", occurrence.name, occurrence.query);
                record.error = Some(e.to_string());
            }
        }
        record
    });

    join_all(runs).await
}
