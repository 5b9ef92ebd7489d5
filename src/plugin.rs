//! Plugin abstraction and registry.
//!
//! A plugin is the static definition of one inline command: its identity and
//! prompt text (the descriptor), its handler, and its persisted-state shape.
//! The registry is an explicit object built once at startup and shared by
//! reference. There is no process-wide singleton, so tests get a fresh
//! registry each.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::AppError;

// ── Descriptor ───────────────────────────────────────────────────

/// A worked question/answer pair teaching the model when to emit the command.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Example {
    pub question: String,
    pub answer: String,
}

/// Static definition of a plugin: identity, prompt text, worked examples.
/// Built once in the plugin's constructor and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Globally unique id, e.g. `atmark.google`.
    pub id: String,
    /// Human-facing display name.
    pub name: String,
    /// The bare invocation token matched after `@`.
    pub command: String,
    /// Short description shown to humans in settings.
    pub human_description: Option<String>,
    /// Description taught to the model, phrased as `@Command(<input>): …`.
    pub ai_description: String,
    pub examples: Vec<Example>,
}

/// Inputs handed to a plugin handler for one occurrence.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The occurrence's raw argument text, whitespace preserved.
    pub query: String,
    /// The user question that produced the answer containing the command.
    pub question: String,
}

/// What a handler produced for one occurrence.
#[derive(Debug, Clone)]
pub struct PluginOutput {
    pub result: Value,
    /// When false the result is never written to disk; a reload shows the
    /// command as pending-re-run instead.
    pub should_persist: bool,
}

impl PluginOutput {
    pub fn persistable(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            should_persist: true,
        }
    }

    pub fn ephemeral(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            should_persist: false,
        }
    }
}

// ── Plugin trait ─────────────────────────────────────────────────

/// The core plugin abstraction.
///
/// State is a capability of the owning plugin: the core stores an opaque
/// JSON blob per plugin id and passes a snapshot into `run`; only the plugin
/// knows the concrete shape (and can publish it via `state_schema` for the
/// external settings UI). Every state shape carries at least an `enabled`
/// flag.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    /// The state a fresh installation starts with. Must include `enabled`.
    fn initial_state(&self) -> Value {
        serde_json::json!({ "enabled": true })
    }

    /// JSON schema of the typed state, when the plugin has settings beyond
    /// the `enabled` flag.
    fn state_schema(&self) -> Option<RootSchema> {
        None
    }

    /// Wall-clock budget the dispatcher enforces on `run`. `None` means
    /// unbounded; only handlers that declare a budget get one.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the command for one occurrence against a state snapshot.
    async fn run(&self, invocation: &Invocation, state: &Value) -> Result<PluginOutput, AppError>;
}

// ── Prompt messages ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message in the prompt sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Preamble used whether or not any command is available.
const ASSISTANT_PREAMBLE: &str = "You are a helpful assistant, you answer questions in markdown.";

// ── Catalog entry ────────────────────────────────────────────────

/// Frontend-facing view of one registered plugin.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub command: String,
    pub human_description: Option<String>,
    pub ai_description: String,
    pub examples: Vec<Example>,
    /// JSON schema for the plugin's settings state, when it has one.
    #[ts(type = "unknown | null")]
    pub state_schema: Option<Value>,
}

// ── Registry ─────────────────────────────────────────────────────

/// Ordered set of registered plugins. Registration order is observable: the
/// prompt catalogue and worked examples are emitted in it, which keeps
/// prompts reproducible for a given configuration.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Ids and invocation names must be unique; a
    /// collision is rejected rather than shadowing an earlier registration.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), AppError> {
        let descriptor = plugin.descriptor();
        if self.by_id(&descriptor.id).is_some() {
            return Err(AppError::DuplicatePlugin {
                what: format!("id \"{}\"", descriptor.id),
            });
        }
        if self.by_command(&descriptor.command).is_some() {
            return Err(AppError::DuplicatePlugin {
                what: format!("command \"{}\"", descriptor.command),
            });
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Remove a plugin by id. No-op when absent.
    pub fn unregister(&mut self, id: &str) {
        self.plugins.retain(|p| p.descriptor().id != id);
    }

    /// All plugins in registration order.
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .find(|p| p.descriptor().id == id)
            .cloned()
    }

    pub fn by_command(&self, command: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .find(|p| p.descriptor().command == command)
            .cloned()
    }

    /// Build the role-tagged prompt prefix advertising the enabled plugins.
    ///
    /// The system message enumerates each enabled plugin's invocation syntax
    /// and model-facing description; each plugin's worked examples follow as
    /// alternating user/assistant turns. With nothing enabled the system
    /// message degrades to the bare assistant preamble. Deterministic and
    /// order-stable (registration order) so identical configurations produce
    /// identical prompts.
    pub fn prompt_messages(&self, enabled_ids: &HashSet<String>) -> Vec<PromptMessage> {
        let enabled: Vec<&Arc<dyn Plugin>> = self
            .plugins
            .iter()
            .filter(|p| enabled_ids.contains(&p.descriptor().id))
            .collect();

        if enabled.is_empty() {
            return vec![PromptMessage::new(Role::System, ASSISTANT_PREAMBLE)];
        }

        let commands = enabled
            .iter()
            .map(|p| {
                let d = p.descriptor();
                format!("@{}(<input>): {}", d.command, d.ai_description)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut messages = vec![PromptMessage::new(
            Role::System,
            format!(
                "{ASSISTANT_PREAMBLE}\nIf needed, the following commands are available to answer questions:\n{commands}"
            ),
        )];

        for plugin in &enabled {
            for example in &plugin.descriptor().examples {
                messages.push(PromptMessage::new(Role::User, example.question.clone()));
                messages.push(PromptMessage::new(Role::Assistant, example.answer.clone()));
            }
        }

        messages
    }

    /// Frontend-facing catalog of every registered plugin.
    pub fn catalog(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|p| {
                let d = p.descriptor();
                PluginInfo {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    command: d.command.clone(),
                    human_description: d.human_description.clone(),
                    ai_description: d.ai_description.clone(),
                    examples: d.examples.clone(),
                    state_schema: p
                        .state_schema()
                        .and_then(|s| serde_json::to_value(s).ok()),
                }
            })
            .collect()
    }
}

/// Ids of plugins whose state snapshot has `enabled: true`. A state missing
/// the flag counts as disabled.
pub fn enabled_ids<'a, I>(states: I) -> HashSet<String>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    states
        .into_iter()
        .filter(|(_, state)| {
            state
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
        .map(|(id, _)| id.clone())
        .collect()
}
