/// Model collaborator: the `Collaborator` seam and an OpenAI-compatible
/// streaming implementation of it.
use std::future::Future;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ResolvedConfig;
use crate::conversation::{ContentPart, ConversationMessage, Role};
use crate::error::CollaboratorError;

// ── Seam ──────────────────────────────────────────────────────────────────────

/// Opaque request/response boundary: full history in, reply text out.
pub trait Collaborator {
    fn complete(
        &self,
        messages: &[ConversationMessage],
    ) -> impl Future<Output = Result<String, CollaboratorError>>;
}

// ── SSE delta types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Reassembles `data:` lines from arbitrarily split byte chunks.
#[derive(Default)]
struct SseDecoder {
    pending: Vec<u8>,
    text: String,
    done: bool,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.line(&String::from_utf8_lossy(&line));
        }
    }

    fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.line(&String::from_utf8_lossy(&rest));
        }
        self.text
    }

    fn line(&mut self, line: &str) {
        let line = line.trim();
        if self.done || line.is_empty() {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                for choice in chunk.choices.unwrap_or_default() {
                    if let Some(text) = choice.delta.and_then(|d| d.content) {
                        self.text.push_str(&text);
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "skipping undecodable stream line"),
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct Client {
    http: reqwest::Client,
    pub endpoint: String,
    pub model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_output_tokens: u32,
}

impl Client {
    pub fn new(config: &ResolvedConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    async fn stream_completion(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<String, CollaboratorError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "stream": true,
            "max_tokens": self.max_output_tokens,
            "messages": build_messages(messages),
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        tracing::debug!(url = %url, model = %self.model, messages = messages.len(), "sending completion request");
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api { status, body });
        }

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::default();
        while let Some(chunk) = stream.next().await {
            decoder.feed(&chunk?);
        }

        let text = decoder.finish();
        tracing::debug!(chars = text.len(), "completion received");
        if text.trim().is_empty() {
            return Err(CollaboratorError::EmptyResponse);
        }
        Ok(text)
    }
}

impl Collaborator for Client {
    fn complete(
        &self,
        messages: &[ConversationMessage],
    ) -> impl Future<Output = Result<String, CollaboratorError>> {
        self.stream_completion(messages)
    }
}

// ── Build the messages array for the API ──────────────────────────────────────

fn build_messages(messages: &[ConversationMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::User => "user",
                Role::Model => "assistant",
            };
            if !msg.has_inline_binary() {
                return serde_json::json!({ "role": role, "content": msg.text() });
            }
            let parts: Vec<Value> = msg
                .parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => {
                        serde_json::json!({ "type": "text", "text": text })
                    }
                    ContentPart::InlineBinary { inline_data } => {
                        let url = format!(
                            "data:{};base64,{}",
                            inline_data.mime_type,
                            STANDARD.encode(&inline_data.data)
                        );
                        serde_json::json!({ "type": "image_url", "image_url": { "url": url } })
                    }
                })
                .collect();
            serde_json::json!({ "role": role, "content": parts })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_decoder_handles_split_chunks() {
        let mut d = SseDecoder::default();
        d.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi");
        d.feed(b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n");
        d.feed(b"data: [DONE]\n");
        d.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n");
        assert_eq!(d.finish(), "Hello");
    }

    #[test]
    fn test_sse_decoder_keeps_multibyte_chars_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"olá\"}}]}\n".as_bytes();
        // Split inside the two-byte 'á'
        let cut = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut d = SseDecoder::default();
        d.feed(&line[..cut]);
        d.feed(&line[cut..]);
        assert_eq!(d.finish(), "olá");
    }

    #[test]
    fn test_sse_decoder_reads_unterminated_last_line() {
        let mut d = SseDecoder::default();
        d.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert_eq!(d.finish(), "tail");
    }

    #[test]
    fn test_build_messages_maps_roles_and_images() {
        let msgs = vec![
            ConversationMessage::user_text("hi"),
            ConversationMessage::model_text("hello"),
            ConversationMessage {
                parts: vec![ContentPart::inline_binary("image/png", vec![1, 2, 3])],
                role: Role::User,
            },
        ];
        let out = build_messages(&msgs);
        assert_eq!(out[0], serde_json::json!({"role": "user", "content": "hi"}));
        assert_eq!(out[1]["role"], "assistant");
        assert_eq!(out[2]["content"][0]["type"], "image_url");
        assert_eq!(
            out[2]["content"][0]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
    }
}
