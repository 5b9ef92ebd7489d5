//! Google Custom Search plugin.
//!
//! Queries the Custom Search JSON API, formats the top results as a numbered
//! markdown list, and asks the completion model to answer the original
//! question from them, with sources cited. Requires an API key and engine id
//! in the plugin state; ships disabled until both are set.

use async_trait::async_trait;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::AppError;
use crate::llm::LlmClient;
use crate::plugin::{
    Example, Invocation, Plugin, PluginDescriptor, PluginOutput, PromptMessage, Role,
};

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
const NUM_RESULTS: u32 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GoogleState {
    pub enabled: bool,
    /// Custom Search API key.
    pub key: String,
    /// Programmable search engine id.
    pub cx: String,
}

pub struct GooglePlugin {
    descriptor: PluginDescriptor,
    llm: Arc<LlmClient>,
    http: reqwest::Client,
}

impl GooglePlugin {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            descriptor: PluginDescriptor {
                id: "atmark.google".to_string(),
                name: "Google Search".to_string(),
                command: "Google".to_string(),
                human_description: Some("Search Google".to_string()),
                ai_description: "searches Google and returns the top results, this command \
                                 should be used whenever real-time or precise information is \
                                 needed. If you have the tiniest doubt about an answer, use \
                                 this command."
                    .to_string(),
                examples: vec![
                    Example {
                        question: "What is the most popular song right now?".to_string(),
                        answer: "@Google(Most popular song right now)".to_string(),
                    },
                    Example {
                        question: "How many people live in France?".to_string(),
                        answer: "@Google(Population of France)".to_string(),
                    },
                    Example {
                        question: "When will the next SpaceX launch be?".to_string(),
                        answer: "@Google(Next SpaceX launch)".to_string(),
                    },
                ],
            },
            llm,
            http: reqwest::Client::new(),
        }
    }

    async fn search(&self, state: &GoogleState, query: &str) -> Result<Vec<String>, AppError> {
        let response = self
            .http
            .get(SEARCH_URL)
            .query(&[
                ("key", state.key.as_str()),
                ("cx", state.cx.as_str()),
                ("q", query),
                ("num", &NUM_RESULTS.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::handler(&self.descriptor.id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::handler(
                &self.descriptor.id,
                format!("search endpoint returned {status}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::handler(&self.descriptor.id, e.to_string()))?;
        let items = body["items"].as_array().cloned().unwrap_or_default();

        Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "#{} [{}]({}): {}",
                    i + 1,
                    item["title"].as_str().unwrap_or(""),
                    item["link"].as_str().unwrap_or(""),
                    item["snippet"].as_str().unwrap_or(""),
                )
            })
            .collect())
    }
}

const SEARCH_SYSTEM_PROMPT: &str = "You are a helpful search engine assistant answering in markdown.\n\
    trying to answer user questions using the results of a Google search.\n\
    If the answer can accurately be found in the top 5 results,\n\
    you should answer the question and cite the source(s).\n\
    If the answer cannot be found in the snippet for the top results,\n\
    you should visit one page from the top results using the @Visit(<link>) command.";

/// Worked example kept in the summarization prompt so the model answers from
/// result snippets and cites its sources.
const WORKED_EXAMPLE_QUESTION: &str = "Question: When will the next SpaceX launch be?\n\
    Query: Next SpaceX launch\n\
    Results:\n\
    #1 [Launches - SpaceX](https://www.spacex.com/launches/): Launches ; April 7, 2023. Intelsat IS-40e Mission ; April 2, 2023. Space Development Agency's Tranche 0 Mission ; March 29, 2023. Starlink mission ; March 24, 2023.\n\
    #2 [Rocket Launch Schedule | Kennedy Space Center](https://www.kennedyspacecenter.com/launches-and-events): Launches & Events · View Rocket Launches & Be Inspired · NET APRIL 18, 2023 | SpaceX Falcon Heavy ViaSat-3 Americas · Gateway: The Deep Space Launch Complex.\n\
    #3 [Upcoming Rocket Launch List](https://spacecoastlaunches.com/launch-list/): Upcoming Rocket Launch List · Date: April 18, 2023 · Vehicle: SpaceX Falcon Heavy · Mission: Falcon Heavy ViaSat-3 Americas - The ViaSat-3 is a series of three Ka- ...\n\
    #4 [NASA Launch Schedule | Rocket Launches](https://www.nasa.gov/launchschedule): Upcoming launches and landings of crew members to and from the International Space Station, and launches of rockets delivering spacecraft that observe the ...\n\
    #5 [Launch Schedule - Spaceflight Now](https://spaceflightnow.com/launch-schedule/): A SpaceX Falcon 9 rocket will launch the Transporter 7 mission, a rideshare flight to a sun-synchronous orbit with numerous small microsatellites and ...";

const WORKED_EXAMPLE_ANSWER: &str = "The next SpaceX launch will be on **April 18, 2023**.\n\
    The source is [SpaceX Falcon Heavy ViaSat-3 Americas](https://www.kennedyspacecenter.com/launches-and-events).";

#[async_trait]
impl Plugin for GooglePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn initial_state(&self) -> Value {
        serde_json::to_value(GoogleState::default())
            .unwrap_or_else(|_| serde_json::json!({ "enabled": false }))
    }

    fn state_schema(&self) -> Option<RootSchema> {
        Some(schemars::schema_for!(GoogleState))
    }

    async fn run(&self, invocation: &Invocation, state: &Value) -> Result<PluginOutput, AppError> {
        let state: GoogleState = serde_json::from_value(state.clone()).unwrap_or_default();
        if state.key.is_empty() || state.cx.is_empty() {
            return Err(AppError::handler(
                &self.descriptor.id,
                "Google Search is not configured: set the API key and engine id in Settings.",
            ));
        }

        let results = self.search(&state, &invocation.query).await?;
        let messages = vec![
            PromptMessage::new(Role::System, SEARCH_SYSTEM_PROMPT),
            PromptMessage::new(Role::User, WORKED_EXAMPLE_QUESTION),
            PromptMessage::new(Role::Assistant, WORKED_EXAMPLE_ANSWER),
            PromptMessage::new(
                Role::User,
                format!(
                    "Question: {}\nQuery: {}\nResults:\n{}",
                    invocation.question,
                    invocation.query,
                    results.join("\n"),
                ),
            ),
        ];

        let answer = self.llm.complete(&messages).await?;
        Ok(PluginOutput::persistable(answer))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::settings::LlmConfig;

    fn plugin() -> GooglePlugin {
        GooglePlugin::new(Arc::new(LlmClient::new(LlmConfig::default())))
    }

    #[test]
    fn ships_disabled_with_empty_credentials() {
        let state = plugin().initial_state();
        assert_eq!(state["enabled"], false);
        assert_eq!(state["key"], "");
        assert_eq!(state["cx"], "");
    }

    #[test]
    fn publishes_a_state_schema() {
        let schema = plugin().state_schema().unwrap();
        let json = serde_json::to_value(schema).unwrap();
        assert!(json["properties"]["key"].is_object());
        assert!(json["properties"]["cx"].is_object());
        assert!(json["properties"]["enabled"].is_object());
    }

    #[tokio::test]
    async fn unconfigured_state_fails_before_any_network_call() {
        let invocation = Invocation {
            query: "anything".to_string(),
            question: "anything?".to_string(),
        };
        let err = plugin()
            .run(&invocation, &serde_json::json!({ "enabled": true }))
            .await
            .unwrap_err();
        assert!(err.is_handler_failure());
        assert!(err.to_string().contains("not configured"));
    }
}
