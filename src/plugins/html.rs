//! HTML rendering plugin.
//!
//! Writes the argument to a scratch file and returns the file path so the
//! frontend can display it. The path is ephemeral by nature, so results are
//! never persisted; a reload shows the command as pending instead of
//! pointing at a file that may be gone.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;
use crate::plugin::{Example, Invocation, Plugin, PluginDescriptor, PluginOutput};
use crate::storage;

pub struct HtmlPlugin {
    descriptor: PluginDescriptor,
    scratch_dir: PathBuf,
}

impl HtmlPlugin {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self {
            descriptor: PluginDescriptor {
                id: "atmark.html".to_string(),
                name: "HTML Renderer".to_string(),
                command: "HTML".to_string(),
                human_description: Some("Render HTML pages".to_string()),
                ai_description: "Renders an HTML page, all external dependencies must be \
                                 imported using esm.sh. If JSX is needed, import and use htm"
                    .to_string(),
                examples: vec![Example {
                    question: "Render a button using React".to_string(),
                    answer: "@HTML(<html><body><div id=\"root\"></div><script type=\"module\">\
                             import React from 'https://esm.sh/react';\
                             import ReactDOM from 'https://esm.sh/react-dom';\
                             import htm from 'https://esm.sh/htm';\
                             const html = htm.bind(React.createElement);\
                             const App = () => html`<button>Click me</button>`;\
                             ReactDOM.render(html`<${App} />`, document.getElementById('root'));\
                             </script></body></html>)"
                        .to_string(),
                }],
            },
            scratch_dir,
        }
    }
}

#[async_trait]
impl Plugin for HtmlPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(&self, invocation: &Invocation, _state: &Value) -> Result<PluginOutput, AppError> {
        let path = self
            .scratch_dir
            .join(format!("{}.html", uuid::Uuid::new_v4()));
        storage::atomic_write(&path, invocation.query.as_bytes())?;
        Ok(PluginOutput::ephemeral(path.to_string_lossy().into_owned()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_the_page_and_returns_its_path_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = HtmlPlugin::new(dir.path().to_path_buf());
        let invocation = Invocation {
            query: "<html><body>hi</body></html>".to_string(),
            question: String::new(),
        };
        let output = plugin
            .run(&invocation, &serde_json::json!({}))
            .await
            .unwrap();

        assert!(!output.should_persist);
        let path = output.result.as_str().unwrap().to_string();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "<html><body>hi</body></html>");
        assert!(path.ends_with(".html"));
    }

    #[tokio::test]
    async fn distinct_invocations_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = HtmlPlugin::new(dir.path().to_path_buf());
        let invocation = Invocation {
            query: "<p>x</p>".to_string(),
            question: String::new(),
        };
        let a = plugin.run(&invocation, &serde_json::json!({})).await.unwrap();
        let b = plugin.run(&invocation, &serde_json::json!({})).await.unwrap();
        assert_ne!(a.result, b.result);
    }
}
