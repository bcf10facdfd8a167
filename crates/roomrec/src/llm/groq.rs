//! Groq chat-completions client (OpenAI-compatible wire format).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::CompletionModel;
use crate::config::LlmConfig;

const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant for Escape Room recommendations. Always respond in Korean.";

pub struct GroqClient {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl GroqClient {
    /// Build a client from config. Returns `None` when no API key is
    /// configured — the engine reports that as a configuration error
    /// instead of attempting calls.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(120))
            .tcp_nodelay(true)
            .build()?;

        Ok(Some(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }))
    }

    /// Parse a response body as JSON, returning a clear error if the server
    /// returned HTML.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') || trimmed.starts_with("<!") {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint returned HTML instead of JSON (HTTP {}) — service may be down. Response: {}",
                status,
                preview
            ));
        }
        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!("Failed to parse JSON (HTTP {}): {}. Body: {}", status, e, preview)
        })
    }
}

#[async_trait]
impl CompletionModel for GroqClient {
    async fn complete(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let system = if json_mode {
            format!("{} Output JSON only.", SYSTEM_PROMPT)
        } else {
            SYSTEM_PROMPT.to_string()
        };

        let mut request = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false
        });
        if json_mode {
            request["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(GROQ_ENDPOINT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Request to {} timed out — check network connectivity", GROQ_ENDPOINT)
                } else if e.is_connect() {
                    anyhow!(
                        "Failed to connect to {} — check network/firewall/proxy: {}",
                        GROQ_ENDPOINT,
                        e
                    )
                } else {
                    anyhow!("Request to {} failed: {}", GROQ_ENDPOINT, e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await?;
            return Err(anyhow!("Groq API error ({}): {}", status, error));
        }

        let result: ChatResponse = Self::parse_json_response(response).await?;
        result
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("Groq returned empty choices array"))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}
