//! OpenAI-compatible chat-completions judge.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{Judge, JudgeError, JudgeRequest, JudgeResult, TokenUsage};
use crate::config::JudgeSettings;

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

pub struct OpenAiJudge {
    client: Client,
    settings: JudgeSettings,
}

impl OpenAiJudge {
    pub fn new(settings: JudgeSettings, request_timeout: Duration) -> Result<Self, JudgeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn parse_body(body: &str, endpoint: &str) -> Result<ChatCompletionResponse, JudgeError> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(JudgeError::Malformed(format!(
                "{} returned HTML instead of JSON: {}",
                endpoint, preview
            )));
        }
        serde_json::from_str(body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            JudgeError::Malformed(format!("{} ({}). Body: {}", endpoint, e, preview))
        })
    }
}

#[async_trait]
impl Judge for OpenAiJudge {
    async fn complete(&self, request: &JudgeRequest) -> Result<JudgeResult, JudgeError> {
        let endpoint = self.endpoint();
        let mut body = json!({
            "model": self.settings.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": false
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if request.structured_json {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    JudgeError::Transport(format!("request to {} timed out", endpoint))
                } else if e.is_connect() {
                    JudgeError::Transport(format!("failed to connect to {}: {}", endpoint, e))
                } else {
                    JudgeError::Transport(format!("request to {} failed: {}", endpoint, e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| JudgeError::Transport(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(JudgeError::Status {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        let parsed = Self::parse_body(&text, &endpoint)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(JudgeError::Empty)?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(JudgeResult {
            content,
            usage,
            model: parsed.model.or_else(|| Some(self.settings.model.clone())),
        })
    }
}
