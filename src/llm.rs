//! Client for OpenAI-compatible chat-completion endpoints.
//!
//! Two entry points: `complete` for one-shot responses (used by plugins that
//! summarize fetched content) and `stream` for the incremental completion
//! driving the chat UI. Streaming is pull-based: the caller holds a
//! [`CompletionStream`] and asks for the next delta; dropping the stream
//! aborts the underlying request.

use std::collections::VecDeque;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::plugin::PromptMessage;
use crate::settings::LlmConfig;
use crate::sse::{Frame, FrameDecoder};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A config snapshot with everything required to issue a request.
#[derive(Debug, Clone)]
struct ResolvedProvider {
    url: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl ResolvedProvider {
    fn from_config(config: &LlmConfig) -> Result<Self, AppError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(AppError::Validation {
                message: "No API key configured. Set it in Settings.".to_string(),
            })?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            url: format!("{base}/chat/completions"),
            api_key,
            model: config
                .model
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: config.temperature.unwrap_or(0.0),
        })
    }
}

/// Shared completion client. Cheap to clone via `Arc`; the config is updated
/// in place when the user saves settings so in-flight handles pick up the new
/// provider on their next request.
pub struct LlmClient {
    http: reqwest::Client,
    config: Mutex<LlmConfig>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: Mutex::new(config),
        }
    }

    pub fn update_config(&self, config: LlmConfig) {
        *self.config.lock() = config;
    }

    fn request_body(provider: &ResolvedProvider, messages: &[PromptMessage], stream: bool) -> Value {
        json!({
            "model": provider.model,
            "messages": messages,
            "temperature": provider.temperature,
            "stream": stream,
        })
    }

    async fn send(
        &self,
        messages: &[PromptMessage],
        stream: bool,
    ) -> Result<reqwest::Response, AppError> {
        let provider = ResolvedProvider::from_config(&self.config.lock())?;
        let response = self
            .http
            .post(&provider.url)
            .bearer_auth(&provider.api_key)
            .json(&Self::request_body(&provider, messages, stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Api {
                message: format!("completion endpoint returned {status}: {body}"),
            });
        }
        Ok(response)
    }

    /// One-shot completion; returns the full assistant message content.
    pub async fn complete(&self, messages: &[PromptMessage]) -> Result<String, AppError> {
        let body: Value = self.send(messages, false).await?.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(ToString::to_string)
            .ok_or(AppError::Api {
                message: "completion response carried no message content".to_string(),
            })
    }

    /// Start a streaming completion. The returned stream owns the connection;
    /// dropping it cancels the request.
    pub async fn stream(&self, messages: &[PromptMessage]) -> Result<CompletionStream, AppError> {
        let response = self.send(messages, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(AppError::from))
            .boxed();
        Ok(CompletionStream::new(bytes))
    }
}

/// Decode the complete UTF-8 prefix of `buffer`, leaving at most one
/// incomplete trailing sequence behind for the next chunk. Genuinely invalid
/// bytes are replaced rather than stalling the stream.
fn decode_complete_prefix(buffer: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(buffer) {
            Ok(s) => {
                out.push_str(s);
                buffer.clear();
                return out;
            }
            Err(e) => {
                let rest = buffer.split_off(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(buffer));
                *buffer = rest;
                match e.error_len() {
                    Some(len) => {
                        out.push('\u{FFFD}');
                        buffer.drain(..len);
                    }
                    // A trailing sequence the next chunk will complete.
                    None => return out,
                }
            }
        }
    }
}

/// Pull-based incremental completion.
///
/// Wraps the transport byte stream in the SSE frame decoder and extracts the
/// delta text out of each frame's JSON payload. Accumulates the full text as
/// deltas arrive so callers need not. Transport reads carry raw bytes and may
/// end mid-character; undecoded suffix bytes are buffered across reads the
/// same way partial frames are.
pub struct CompletionStream {
    inner: BoxStream<'static, Result<Vec<u8>, AppError>>,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
    /// Bytes of an incomplete UTF-8 sequence at the end of the last read.
    partial: Vec<u8>,
    eof: bool,
    done: bool,
    text: String,
}

impl CompletionStream {
    fn new(inner: BoxStream<'static, Result<Vec<u8>, AppError>>) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            partial: Vec::new(),
            eof: false,
            done: false,
            text: String::new(),
        }
    }

    /// Next piece of assistant text, or `None` when the stream has ended
    /// (sentinel frame or transport close). Frames without delta content
    /// (role preludes, empty deltas) are skipped transparently.
    pub async fn next_delta(&mut self) -> Result<Option<String>, AppError> {
        loop {
            if self.done {
                return Ok(None);
            }
            while let Some(frame) = self.pending.pop_front() {
                if frame.is_done() {
                    self.done = true;
                    self.pending.clear();
                    return Ok(None);
                }
                if let Some(delta) = delta_content(&frame) {
                    self.text.push_str(&delta);
                    return Ok(Some(delta));
                }
            }
            if self.eof {
                self.done = true;
                return Ok(None);
            }
            match self.inner.next().await {
                Some(chunk) => {
                    self.partial.extend_from_slice(&chunk?);
                    let text = decode_complete_prefix(&mut self.partial);
                    self.pending.extend(self.decoder.push(&text));
                }
                None => {
                    self.eof = true;
                    if !self.partial.is_empty() {
                        let text = String::from_utf8_lossy(&self.partial).into_owned();
                        self.partial.clear();
                        self.pending.extend(self.decoder.push(&text));
                    }
                    if let Some(frame) = self.decoder.finish() {
                        self.pending.push_back(frame);
                    }
                }
            }
        }
    }

    /// Everything received so far.
    pub fn full_text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

fn delta_content(frame: &Frame) -> Option<String> {
    let payload: Value = serde_json::from_str(&frame.data).ok()?;
    payload["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn delta_frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    fn stream_of(chunks: Vec<&str>) -> CompletionStream {
        byte_stream_of(chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    fn byte_stream_of(chunks: Vec<Vec<u8>>) -> CompletionStream {
        let owned: Vec<Result<Vec<u8>, AppError>> = chunks.into_iter().map(Ok).collect();
        CompletionStream::new(stream::iter(owned).boxed())
    }

    #[tokio::test]
    async fn yields_deltas_and_accumulates_full_text() {
        let mut s = stream_of(vec![
            &delta_frame("Hel"),
            &delta_frame("lo"),
            "data: [DONE]\n\n",
        ]);
        assert_eq!(s.next_delta().await.unwrap().unwrap(), "Hel");
        assert_eq!(s.next_delta().await.unwrap().unwrap(), "lo");
        assert!(s.next_delta().await.unwrap().is_none());
        assert_eq!(s.full_text(), "Hello");
    }

    #[tokio::test]
    async fn skips_frames_without_delta_content() {
        let prelude = format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "role": "assistant" } }] })
        );
        let mut s = stream_of(vec![&prelude, &delta_frame("x"), "data: [DONE]\n\n"]);
        assert_eq!(s.next_delta().await.unwrap().unwrap(), "x");
        assert!(s.next_delta().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn frames_split_across_transport_chunks_reassemble() {
        let frame = delta_frame("split");
        let (a, b) = frame.split_at(7);
        let mut s = stream_of(vec![a, b, "data: [DONE]\n\n"]);
        assert_eq!(s.next_delta().await.unwrap().unwrap(), "split");
        assert!(s.next_delta().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn multibyte_chars_split_across_reads_decode_intact() {
        let frame = delta_frame("héllo");
        let bytes = frame.as_bytes();
        // Cut between the two bytes of 'é'.
        let split = frame.find('é').unwrap() + 1;
        let mut s = byte_stream_of(vec![
            bytes[..split].to_vec(),
            bytes[split..].to_vec(),
            b"data: [DONE]\n\n".to_vec(),
        ]);
        assert_eq!(s.next_delta().await.unwrap().unwrap(), "héllo");
        assert!(s.next_delta().await.unwrap().is_none());
        assert_eq!(s.full_text(), "héllo");
    }

    #[test]
    fn incomplete_trailing_sequences_wait_for_the_next_read() {
        let mut buffer = b"h\xC3".to_vec();
        assert_eq!(decode_complete_prefix(&mut buffer), "h");
        assert_eq!(buffer, b"\xC3");
        buffer.extend_from_slice(b"\xA9!");
        assert_eq!(decode_complete_prefix(&mut buffer), "é!");
        assert!(buffer.is_empty());
    }

    #[test]
    fn invalid_bytes_are_replaced_not_stalled() {
        let mut buffer = b"a\xFFb".to_vec();
        assert_eq!(decode_complete_prefix(&mut buffer), "a\u{FFFD}b");
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn transport_close_without_sentinel_ends_the_stream() {
        let mut s = stream_of(vec![&delta_frame("only")]);
        assert_eq!(s.next_delta().await.unwrap().unwrap(), "only");
        assert!(s.next_delta().await.unwrap().is_none());
        assert!(s.next_delta().await.unwrap().is_none());
        assert_eq!(s.full_text(), "only");
    }

    #[test]
    fn provider_resolution_requires_a_key_and_defaults_the_model() {
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "https://api.openai.com/v1/".to_string(),
            model: None,
            temperature: None,
        };
        let provider = ResolvedProvider::from_config(&config).unwrap();
        assert_eq!(provider.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(provider.model, DEFAULT_MODEL);

        let missing = LlmConfig {
            api_key: None,
            ..config
        };
        assert!(matches!(
            ResolvedProvider::from_config(&missing).unwrap_err(),
            AppError::Validation { .. }
        ));
    }
}
