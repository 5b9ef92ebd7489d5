//! JavaScript evaluation plugin.
//!
//! Runs the argument in a short-lived `node` subprocess. The argument is
//! expected to be a function (or a plain value); the wrapper calls it, awaits
//! the result, and prints it back as a one-line JSON envelope on stdout.
//! The subprocess is killed when the dispatcher's 10 second budget elapses.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::plugin::{Example, Invocation, Plugin, PluginDescriptor, PluginOutput};

const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct JsPlugin {
    descriptor: PluginDescriptor,
}

impl JsPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor {
                id: "atmark.js".to_string(),
                name: "JavaScript Evaluator".to_string(),
                command: "JS".to_string(),
                human_description: Some("Evaluate JavaScript code".to_string()),
                ai_description: "executes a JavaScript program in an isolated process, \
                                 the program should return a function which efficiently \
                                 returns the expected result."
                    .to_string(),
                examples: vec![
                    Example {
                        question: "What is the terminal velocity of a 10kg object falling \
                                   from a height of 100m, ignoring air resistance?"
                            .to_string(),
                        answer: "@JS(() => Math.sqrt(2 * 9.81 * 100)) m/s".to_string(),
                    },
                    Example {
                        question: "What is the date?".to_string(),
                        answer: "Today is the @JS(() => new Date().toLocaleDateString())"
                            .to_string(),
                    },
                ],
            },
        }
    }
}

impl Default for JsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct EvalEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

fn wrapper_source(code: &str) -> String {
    format!(
        "const f = {code};\n\
         const value = typeof f === 'function' ? f() : f;\n\
         Promise.resolve(value)\n\
           .then(v => process.stdout.write(JSON.stringify({{ type: 'result', value: v === undefined ? null : v }})))\n\
           .catch(e => process.stdout.write(JSON.stringify({{ type: 'error', error: String(e) }})));"
    )
}

#[async_trait]
impl Plugin for JsPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn timeout(&self) -> Option<Duration> {
        Some(EVAL_TIMEOUT)
    }

    async fn run(&self, invocation: &Invocation, _state: &Value) -> Result<PluginOutput, AppError> {
        let output = tokio::process::Command::new("node")
            .arg("-e")
            .arg(wrapper_source(&invocation.query))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::handler(&self.descriptor.id, format!("node: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        // Syntax errors and uncaught throws never reach the wrapper's catch.
        let Ok(envelope) = serde_json::from_str::<EvalEnvelope>(stdout.trim()) else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                "evaluation produced no result".to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(AppError::handler(&self.descriptor.id, detail));
        };

        if envelope.kind == "result" {
            Ok(PluginOutput::persistable(envelope.value))
        } else {
            Err(AppError::handler(
                &self.descriptor.id,
                envelope.error.unwrap_or_else(|| "evaluation failed".to_string()),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn has_node() -> bool {
        std::process::Command::new("node")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[test]
    fn wrapper_embeds_the_code_verbatim() {
        let source = wrapper_source("() => 1 + 1");
        assert!(source.starts_with("const f = () => 1 + 1;"));
        assert!(source.contains("type: 'result'"));
    }

    #[tokio::test]
    async fn evaluates_a_function_expression() {
        if !has_node() {
            return;
        }
        let plugin = JsPlugin::new();
        let invocation = Invocation {
            query: "() => 6 * 7".to_string(),
            question: String::new(),
        };
        let output = plugin
            .run(&invocation, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(output.result, serde_json::json!(42));
        assert!(output.should_persist);
    }

    #[tokio::test]
    async fn plain_values_evaluate_without_a_call() {
        if !has_node() {
            return;
        }
        let plugin = JsPlugin::new();
        let invocation = Invocation {
            query: "'hi'.toUpperCase()".to_string(),
            question: String::new(),
        };
        let output = plugin
            .run(&invocation, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(output.result, serde_json::json!("HI"));
    }

    #[tokio::test]
    async fn a_throwing_program_is_a_handler_failure() {
        if !has_node() {
            return;
        }
        let plugin = JsPlugin::new();
        let invocation = Invocation {
            query: "() => { throw new Error('boom') }".to_string(),
            question: String::new(),
        };
        let err = plugin
            .run(&invocation, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_handler_failure());
        assert!(err.to_string().contains("boom"));
    }
}
