//! Conversation store: conversations, their message lists, and per-plugin
//! state blobs, with persistence filtering.
//!
//! There is always at least one conversation and always an active one.
//! Messages come in question/answer pairs; answers carry the substitution
//! records for the commands they contained. Persistence strips results that
//! opted out or are too large, keeping the span and plugin so a reload shows
//! those commands as pending rather than resolved.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::dispatcher::SubstitutionRecord;
use crate::error::AppError;
use crate::paths;
use crate::plugin::PluginRegistry;
use crate::storage;

/// Results whose JSON encoding exceeds this many characters are not
/// persisted; the record survives with `result` cleared.
pub const PERSIST_RESULT_CEILING: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export)]
pub enum MessageBody {
    Question {
        content: String,
    },
    Answer {
        content: String,
        substitutions: Vec<SubstitutionRecord>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Message {
    pub uuid: String,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    fn new(body: MessageBody) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: now_ms(),
            body,
        }
    }

    pub fn question(content: impl Into<String>) -> Self {
        Self::new(MessageBody::Question {
            content: content.into(),
        })
    }

    pub fn answer(content: impl Into<String>, substitutions: Vec<SubstitutionRecord>) -> Self {
        Self::new(MessageBody::Answer {
            content: content.into(),
            substitutions,
        })
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Conversation {
    pub uuid: String,
    pub title: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    fn new(title: impl Into<String>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub conversations: Vec<Conversation>,
    /// Uuid of the active conversation. Always names an existing one.
    pub active: String,
    /// Counter feeding default conversation titles.
    next_index: u64,
    /// Opaque per-plugin state blobs, keyed by plugin id.
    pub plugin_states: IndexMap<String, Value>,
}

impl Default for Store {
    fn default() -> Self {
        let conversation = Conversation::new("Untitled 1");
        let active = conversation.uuid.clone();
        Self {
            conversations: vec![conversation],
            active,
            next_index: 2,
            plugin_states: IndexMap::new(),
        }
    }
}

impl Store {
    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.uuid == self.active)
    }

    pub fn conversation(&self, uuid: &str) -> Result<&Conversation, AppError> {
        self.conversations
            .iter()
            .find(|c| c.uuid == uuid)
            .ok_or(AppError::NotFound {
                what: format!("conversation {uuid}"),
            })
    }

    fn conversation_mut(&mut self, uuid: &str) -> Result<&mut Conversation, AppError> {
        self.conversations
            .iter_mut()
            .find(|c| c.uuid == uuid)
            .ok_or(AppError::NotFound {
                what: format!("conversation {uuid}"),
            })
    }

    /// Create a conversation, make it active, return its uuid.
    pub fn add_conversation(&mut self) -> String {
        let conversation = Conversation::new(format!("Untitled {}", self.next_index));
        self.next_index += 1;
        let uuid = conversation.uuid.clone();
        self.conversations.push(conversation);
        self.active = uuid.clone();
        uuid
    }

    /// Remove a conversation. The store never goes empty: removing the last
    /// one replaces it with a fresh conversation, and removing the active one
    /// activates the nearest remaining neighbor.
    pub fn remove_conversation(&mut self, uuid: &str) -> Result<(), AppError> {
        let index = self
            .conversations
            .iter()
            .position(|c| c.uuid == uuid)
            .ok_or(AppError::NotFound {
                what: format!("conversation {uuid}"),
            })?;
        self.conversations.remove(index);

        if self.conversations.is_empty() {
            self.add_conversation();
            return Ok(());
        }
        if self.active == uuid {
            let fallback = index.min(self.conversations.len() - 1);
            if let Some(neighbor) = self.conversations.get(fallback) {
                self.active = neighbor.uuid.clone();
            }
        }
        Ok(())
    }

    pub fn set_active(&mut self, uuid: &str) -> Result<(), AppError> {
        self.conversation(uuid)?;
        self.active = uuid.to_string();
        Ok(())
    }

    pub fn rename_conversation(&mut self, uuid: &str, title: &str) -> Result<(), AppError> {
        self.conversation_mut(uuid)?.title = title.to_string();
        Ok(())
    }

    /// Append a question; returns the new message's uuid.
    pub fn add_question(&mut self, conversation: &str, content: &str) -> Result<String, AppError> {
        let message = Message::question(content);
        let uuid = message.uuid.clone();
        self.conversation_mut(conversation)?.messages.push(message);
        Ok(uuid)
    }

    /// Append an answer with its substitution records; returns the uuid.
    pub fn add_answer(
        &mut self,
        conversation: &str,
        content: &str,
        substitutions: Vec<SubstitutionRecord>,
    ) -> Result<String, AppError> {
        let message = Message::answer(content, substitutions);
        let uuid = message.uuid.clone();
        self.conversation_mut(conversation)?.messages.push(message);
        Ok(uuid)
    }

    /// Replace an answer's substitution records after dispatch resolves.
    pub fn update_substitutions(
        &mut self,
        conversation: &str,
        message: &str,
        substitutions: Vec<SubstitutionRecord>,
    ) -> Result<(), AppError> {
        let conversation = self.conversation_mut(conversation)?;
        let target = conversation
            .messages
            .iter_mut()
            .find(|m| m.uuid == message)
            .ok_or(AppError::NotFound {
                what: format!("message {message}"),
            })?;
        match &mut target.body {
            MessageBody::Answer { substitutions: existing, .. } => {
                *existing = substitutions;
                Ok(())
            }
            MessageBody::Question { .. } => Err(AppError::Validation {
                message: "cannot attach substitutions to a question".to_string(),
            }),
        }
    }

    /// Remove a message. A question and the answer that follows it form a
    /// pair; removing either removes both.
    pub fn remove_message(&mut self, conversation: &str, message: &str) -> Result<(), AppError> {
        let conversation = self.conversation_mut(conversation)?;
        let index = conversation
            .messages
            .iter()
            .position(|m| m.uuid == message)
            .ok_or(AppError::NotFound {
                what: format!("message {message}"),
            })?;

        let is_question = matches!(
            conversation.messages.get(index).map(|m| &m.body),
            Some(MessageBody::Question { .. })
        );
        if is_question {
            let next_is_answer = matches!(
                conversation.messages.get(index + 1).map(|m| &m.body),
                Some(MessageBody::Answer { .. })
            );
            conversation.messages.remove(index);
            if next_is_answer {
                conversation.messages.remove(index);
            }
        } else {
            conversation.messages.remove(index);
            let prev_is_question = index > 0
                && matches!(
                    conversation.messages.get(index - 1).map(|m| &m.body),
                    Some(MessageBody::Question { .. })
                );
            if prev_is_question {
                conversation.messages.remove(index - 1);
            }
        }
        Ok(())
    }

    pub fn plugin_state(&self, plugin_id: &str) -> Option<&Value> {
        self.plugin_states.get(plugin_id)
    }

    pub fn set_plugin_state(&mut self, plugin_id: &str, state: Value) {
        self.plugin_states.insert(plugin_id.to_string(), state);
    }

    /// Seed missing plugin states from the registry's initial states. New
    /// plugins appear with their defaults; existing states are untouched.
    pub fn ensure_plugin_states(&mut self, registry: &PluginRegistry) {
        for plugin in registry.plugins() {
            let id = &plugin.descriptor().id;
            if !self.plugin_states.contains_key(id) {
                self.plugin_states.insert(id.clone(), plugin.initial_state());
            }
        }
    }

    /// The store as written to disk: every substitution result that opted out
    /// of persistence or whose JSON encoding exceeds the ceiling is dropped,
    /// leaving the record itself (span, plugin, query) intact.
    pub fn to_persistable(&self) -> Store {
        let mut copy = self.clone();
        for conversation in &mut copy.conversations {
            for message in &mut conversation.messages {
                if let MessageBody::Answer { substitutions, .. } = &mut message.body {
                    for record in substitutions {
                        let keep = record.should_persist
                            && record.result.as_ref().is_some_and(|r| {
                                serde_json::to_string(r)
                                    .map(|s| s.chars().count() <= PERSIST_RESULT_CEILING)
                                    .unwrap_or(false)
                            });
                        if !keep {
                            record.result = None;
                        }
                    }
                }
            }
        }
        copy
    }

    pub fn save(&self, config_dir: &std::path::Path) -> Result<(), AppError> {
        storage::write_json(&paths::conversations_path(config_dir), &self.to_persistable())
    }

    pub fn load(config_dir: &std::path::Path) -> Result<Store, AppError> {
        Ok(storage::read_json(&paths::conversations_path(config_dir))?.unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    fn record(result: Option<Value>, should_persist: bool) -> SubstitutionRecord {
        SubstitutionRecord {
            plugin_id: "test.p".to_string(),
            start: 0,
            end: 7,
            query: "q".to_string(),
            result,
            should_persist,
            error: None,
        }
    }

    #[test]
    fn starts_with_one_active_conversation() {
        let store = Store::default();
        assert_eq!(store.conversations.len(), 1);
        assert_eq!(store.active_conversation().unwrap().title, "Untitled 1");
    }

    #[test]
    fn removing_the_last_conversation_replaces_it() {
        let mut store = Store::default();
        let uuid = store.active.clone();
        store.remove_conversation(&uuid).unwrap();
        assert_eq!(store.conversations.len(), 1);
        assert_ne!(store.active, uuid);
        assert_eq!(store.active_conversation().unwrap().uuid, store.active);
    }

    #[test]
    fn removing_the_active_conversation_activates_a_neighbor() {
        let mut store = Store::default();
        let first = store.active.clone();
        let second = store.add_conversation();
        let third = store.add_conversation();
        store.set_active(&second).unwrap();
        store.remove_conversation(&second).unwrap();
        // The conversation that slid into the removed slot becomes active.
        assert_eq!(store.active, third);
        assert_eq!(store.conversations[0].uuid, first);
    }

    #[test]
    fn removing_a_question_takes_its_answer_along() {
        let mut store = Store::default();
        let conversation = store.active.clone();
        let q1 = store.add_question(&conversation, "first?").unwrap();
        store.add_answer(&conversation, "first.", Vec::new()).unwrap();
        let q2 = store.add_question(&conversation, "second?").unwrap();

        store.remove_message(&conversation, &q1).unwrap();
        let messages = &store.conversation(&conversation).unwrap().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].uuid, q2);
    }

    #[test]
    fn removing_an_answer_takes_its_question_along() {
        let mut store = Store::default();
        let conversation = store.active.clone();
        store.add_question(&conversation, "first?").unwrap();
        let a1 = store.add_answer(&conversation, "first.", Vec::new()).unwrap();
        let q2 = store.add_question(&conversation, "second?").unwrap();

        store.remove_message(&conversation, &a1).unwrap();
        let messages = &store.conversation(&conversation).unwrap().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].uuid, q2);
    }

    #[test]
    fn oversized_results_persist_with_the_result_cleared() {
        let mut store = Store::default();
        let conversation = store.active.clone();
        let big = Value::String("x".repeat(PERSIST_RESULT_CEILING + 1));
        store
            .add_answer(
                &conversation,
                "ans @P(q) end",
                vec![
                    record(Some(big), true),
                    record(Some(Value::String("small".to_string())), true),
                ],
            )
            .unwrap();

        let persisted = store.to_persistable();
        let MessageBody::Answer { substitutions, .. } =
            &persisted.conversations[0].messages[0].body
        else {
            panic!("expected an answer");
        };
        assert!(substitutions[0].result.is_none());
        // Span and plugin survive so a reload can re-run the command.
        assert_eq!(substitutions[0].start, 0);
        assert_eq!(substitutions[0].end, 7);
        assert_eq!(substitutions[0].plugin_id, "test.p");
        assert_eq!(substitutions[1].result.as_ref().unwrap(), "small");
    }

    #[test]
    fn opt_out_results_are_never_persisted() {
        let mut store = Store::default();
        let conversation = store.active.clone();
        store
            .add_answer(
                &conversation,
                "a @P(q) b",
                vec![record(Some(Value::String("ephemeral".to_string())), false)],
            )
            .unwrap();
        let persisted = store.to_persistable();
        let MessageBody::Answer { substitutions, .. } =
            &persisted.conversations[0].messages[0].body
        else {
            panic!("expected an answer");
        };
        assert!(substitutions[0].result.is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::default();
        let conversation = store.active.clone();
        store.add_question(&conversation, "hello?").unwrap();
        store.set_plugin_state("test.p", serde_json::json!({ "enabled": true }));
        store.save(dir.path()).unwrap();

        let loaded = Store::load(dir.path()).unwrap();
        assert_eq!(loaded.active, store.active);
        assert_eq!(loaded.conversations[0].messages.len(), 1);
        assert_eq!(loaded.plugin_states["test.p"]["enabled"], true);
    }

    #[test]
    fn ensure_plugin_states_seeds_without_clobbering() {
        use crate::plugin::tests::EchoPlugin;
        use std::sync::Arc;

        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin::new("A"))).unwrap();
        registry.register(Arc::new(EchoPlugin::new("B"))).unwrap();

        let mut store = Store::default();
        store.set_plugin_state("test.a", serde_json::json!({ "enabled": false, "custom": 1 }));
        store.ensure_plugin_states(&registry);

        assert_eq!(store.plugin_states["test.a"]["custom"], 1);
        assert_eq!(store.plugin_states["test.a"]["enabled"], false);
        assert_eq!(store.plugin_states["test.b"]["enabled"], true);
    }
}
