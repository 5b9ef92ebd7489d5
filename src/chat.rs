//! Chat orchestration: question in, streamed answer out, commands dispatched
//! and their results attached to the stored answer.
//!
//! The flow for one message:
//!   1. snapshot the conversation history (before the new question is added),
//!   2. build the prompt: plugin catalogue and examples, history, question,
//!   3. stream the completion, emitting deltas as they arrive,
//!   4. parse the full answer for command occurrences and store the answer
//!      with pending records,
//!   5. dispatch every occurrence concurrently and replace the records with
//!      the resolved ones.
//!
//! Progress reaches the caller through a [`ChatEmitter`], so the HTTP API and
//! the CLI share this module and differ only in how they surface events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::dispatcher::{dispatch_all, SubstitutionRecord};
use crate::error::AppError;
use crate::parser::{parse, Occurrence};
use crate::plugin::{enabled_ids, PromptMessage, Role};
use crate::state::AppState;
use crate::store::{Message, MessageBody};

/// Sink for chat progress events.
pub trait ChatEmitter: Send + Sync {
    /// A piece of streamed answer text.
    fn emit_delta(&self, delta: &str);
    /// A command occurrence found in the completed answer, pre-dispatch.
    fn emit_command(&self, occurrence: &Occurrence);
    /// Dispatch finished; these are the final records.
    fn emit_substitutions(&self, records: &[SubstitutionRecord]);
    /// The answer is complete and stored.
    fn emit_complete(&self, message_uuid: &str);
    fn emit_error(&self, error: &AppError);
}

/// Emitter that drops everything; callers that only want the stored result.
pub struct NoopChatEmitter;

impl ChatEmitter for NoopChatEmitter {
    fn emit_delta(&self, _delta: &str) {}
    fn emit_command(&self, _occurrence: &Occurrence) {}
    fn emit_substitutions(&self, _records: &[SubstitutionRecord]) {}
    fn emit_complete(&self, _message_uuid: &str) {}
    fn emit_error(&self, _error: &AppError) {}
}

/// Cancellation latch for the in-flight completion.
#[derive(Default)]
pub struct ChatManager {
    cancelled: AtomicBool,
}

impl ChatManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current stream. The stream notices at the
    /// next delta boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn begin(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn history_messages(messages: &[Message]) -> Vec<PromptMessage> {
    messages
        .iter()
        .map(|m| match &m.body {
            MessageBody::Question { content } => PromptMessage::new(Role::User, content.clone()),
            MessageBody::Answer { content, .. } => {
                PromptMessage::new(Role::Assistant, content.clone())
            }
        })
        .collect()
}

/// Run one question through the full pipeline. Returns the stored answer, or
/// `Ok(None)` when the stream was cancelled (nothing is stored in that case).
pub async fn send_message(
    state: &Arc<AppState>,
    emitter: &dyn ChatEmitter,
    conversation: &str,
    question: &str,
) -> Result<Option<Message>, AppError> {
    state.chat.begin();

    // History snapshot and plugin-state snapshot, taken before the question
    // lands so the prompt does not contain it twice.
    let (history, states): (Vec<PromptMessage>, IndexMap<String, Value>) =
        state.with_store(|store| -> Result<_, AppError> {
            let target = store.conversation(conversation)?;
            Ok((history_messages(&target.messages), store.plugin_states.clone()))
        })?;

    let enabled = enabled_ids(states.iter());
    let mut prompt = state.registry.prompt_messages(&enabled);
    prompt.extend(history);
    prompt.push(PromptMessage::new(Role::User, question));

    let mut stream = match state.llm.stream(&prompt).await {
        Ok(stream) => stream,
        Err(e) => {
            emitter.emit_error(&e);
            return Err(e);
        }
    };

    loop {
        if state.chat.is_cancelled() {
            // Dropping the stream tears down the connection.
            return Ok(None);
        }
        match stream.next_delta().await {
            Ok(Some(delta)) => emitter.emit_delta(&delta),
            Ok(None) => break,
            Err(e) => {
                emitter.emit_error(&e);
                return Err(e);
            }
        }
    }

    let answer_text = stream.into_text();
    let occurrences = parse(&answer_text);
    for occurrence in &occurrences {
        emitter.emit_command(occurrence);
    }

    // Store the answer immediately with pending records so the conversation
    // is never missing its answer while handlers run.
    let pending: Vec<SubstitutionRecord> = occurrences
        .iter()
        .map(|occ| {
            let plugin_id = state
                .registry
                .by_command(&occ.name)
                .map_or_else(|| occ.name.clone(), |p| p.descriptor().id.clone());
            SubstitutionRecord::pending(plugin_id, occ)
        })
        .collect();

    let answer_uuid = state.update_store(|store| {
        store.add_question(conversation, question)?;
        store.add_answer(conversation, &answer_text, pending)
    })??;

    let records = dispatch_all(&state.registry, &occurrences, question, &states).await;
    emitter.emit_substitutions(&records);

    state.update_store(|store| {
        store.update_substitutions(conversation, &answer_uuid, records)
    })??;

    emitter.emit_complete(&answer_uuid);

    let message = state.with_store(|store| {
        store
            .conversation(conversation)
            .ok()
            .and_then(|c| c.messages.iter().find(|m| m.uuid == answer_uuid).cloned())
    });
    Ok(message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn history_maps_questions_and_answers_to_roles() {
        let messages = vec![
            Message::question("q1"),
            Message::answer("a1", Vec::new()),
            Message::question("q2"),
        ];
        let history = history_messages(&messages);
        assert_eq!(history.len(), 3);
        assert!(matches!(history[0].role, Role::User));
        assert!(matches!(history[1].role, Role::Assistant));
        assert_eq!(history[2].content, "q2");
    }

    #[test]
    fn cancellation_latch_resets_on_begin() {
        let manager = ChatManager::new();
        assert!(!manager.is_cancelled());
        manager.cancel();
        assert!(manager.is_cancelled());
        manager.begin();
        assert!(!manager.is_cancelled());
    }
}
