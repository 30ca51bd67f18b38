//! HTTP backend talking to the Anthropic Messages API directly, without any
//! intermediate agent framework. One request per `complete` call — Homie's
//! `Backend` contract has no client-visible tool-execution loop, so there is
//! nothing here to iterate beyond a single round trip.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::{
    looks_like_context_overflow, Backend, BackendError, BackendRole, CompletionParams,
    CompletionResult, MessageRole, Usage,
};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat01-";

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    is_oauth: bool,
    default_model: String,
    fast_model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String, default_model: String, fast_model: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            is_oauth: api_key.starts_with(OAUTH_TOKEN_PREFIX),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_model,
            fast_model,
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.is_oauth {
            builder
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("anthropic-beta", "oauth-2025-04-20")
        } else {
            builder.header("x-api-key", &self.api_key)
        }
    }

    fn model_for(&self, role: BackendRole) -> &str {
        match role {
            BackendRole::Default => &self.default_model,
            BackendRole::Fast => &self.fast_model,
        }
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    async fn complete(&self, params: CompletionParams) -> Result<CompletionResult, BackendError> {
        let model = self.model_for(params.role).to_string();
        let body = build_request_body(&model, &params);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %model, "sending request to Anthropic");

        let builder = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let send = async {
            self.apply_auth(builder)
                .send()
                .await
                .map_err(|e| BackendError::TransientBackend(e.to_string()))
        };

        let resp = match params.cancellation.as_ref() {
            Some(token) => tokio::select! {
                r = send => r?,
                _ = token.cancelled() => return Err(BackendError::Cancelled),
            },
            None => send.await?,
        };

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(BackendError::TransientBackend("rate limited".into()));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "Anthropic API error");
            if status.as_u16() == 400 && looks_like_context_overflow(&text) {
                return Err(BackendError::ContextOverflow);
            }
            return Err(BackendError::TransientBackend(format!("status {status}: {text}")));
        }

        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::BackendParse(e.to_string()))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResult {
            text,
            steps: 1,
            usage: Some(Usage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            }),
            model_id: Some(parsed.model),
        })
    }
}

fn build_request_body(model: &str, params: &CompletionParams) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = params
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": match m.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::System => "user",
                },
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "max_tokens": 4096,
        "system": params.system,
        "messages": messages,
        "stream": false,
    });

    if !params.tools.is_empty() {
        let tools: Vec<serde_json::Value> = params
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendMessage;

    #[test]
    fn default_role_selects_default_model() {
        let backend = AnthropicBackend::new("key".into(), "big-model".into(), "small-model".into(), None);
        assert_eq!(backend.model_for(BackendRole::Default), "big-model");
        assert_eq!(backend.model_for(BackendRole::Fast), "small-model");
    }

    #[test]
    fn request_body_carries_system_and_messages() {
        let params = CompletionParams {
            role: BackendRole::Default,
            system: "be nice".into(),
            max_steps: 1,
            messages: vec![BackendMessage {
                role: MessageRole::User,
                content: "hi".into(),
            }],
            tools: Vec::new(),
            cancellation: None,
        };
        let body = build_request_body("claude-x", &params);
        assert_eq!(body["system"], "be nice");
        assert_eq!(body["messages"][0]["content"], "hi");
    }
}
