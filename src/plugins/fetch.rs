//! URL fetching plugin.
//!
//! Downloads the page at the argument URL, truncates it to a prompt-sized
//! prefix, and asks the completion model to answer the original question
//! from the contents.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;
use crate::llm::LlmClient;
use crate::plugin::{
    Example, Invocation, Plugin, PluginDescriptor, PluginOutput, PromptMessage, Role,
};

/// Character budget for page contents handed to the model.
const CONTENTS_LIMIT: usize = 5_000;

const FETCH_SYSTEM_PROMPT: &str = "You are a helpful assistant answering in markdown.\n\
    You are given the HTML contents of a URL and you should use the contents to answer the question.";

pub struct FetchPlugin {
    descriptor: PluginDescriptor,
    llm: Arc<LlmClient>,
    http: reqwest::Client,
}

impl FetchPlugin {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            descriptor: PluginDescriptor {
                id: "atmark.fetch".to_string(),
                name: "Fetch".to_string(),
                command: "Fetch".to_string(),
                human_description: Some("Fetch the contents of a URL".to_string()),
                ai_description: "fetches the contents of a URL and returns the result. \
                                 This command should be used whenever data from a specific \
                                 URL is needed."
                    .to_string(),
                examples: vec![
                    Example {
                        question: "What is the most popular song right now?".to_string(),
                        answer: "@Fetch(https://www.billboard.com/charts/hot-100/)".to_string(),
                    },
                    Example {
                        question: "Summarize the Wikipedia page on the French Revolution"
                            .to_string(),
                        answer: "@Fetch(https://en.wikipedia.org/wiki/French_Revolution)"
                            .to_string(),
                    },
                ],
            },
            llm,
            http: reqwest::Client::new(),
        }
    }
}

/// First `limit` characters, cut on a char boundary.
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte, _)) => text.get(..byte).unwrap_or(text),
        None => text,
    }
}

#[async_trait]
impl Plugin for FetchPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(&self, invocation: &Invocation, _state: &Value) -> Result<PluginOutput, AppError> {
        let url = invocation.query.trim();
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::handler(&self.descriptor.id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::handler(
                &self.descriptor.id,
                format!("{url} returned {status}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::handler(&self.descriptor.id, e.to_string()))?;
        let contents = truncate_chars(&body, CONTENTS_LIMIT);

        let messages = vec![
            PromptMessage::new(Role::System, FETCH_SYSTEM_PROMPT),
            PromptMessage::new(
                Role::User,
                format!(
                    "Question: {}\nURL: {url}\nContents:\n{contents}",
                    invocation.question,
                ),
            ),
        ];

        let answer = self.llm.complete(&messages).await?;
        Ok(PluginOutput::persistable(answer))
    }
}
