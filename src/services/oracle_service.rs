use crate::error::{Error, Result};
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::time::Duration;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Thin client for the scoring oracle (an OpenAI-compatible
/// chat-completions endpoint). Prompt construction and reply parsing live
/// in the scoring strategies; this service only moves text.
#[derive(Clone)]
pub struct OracleService {
    client: Client,
    api_key: String,
    model: String,
}

impl OracleService {
    pub fn new(api_key: String, model: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    /// Free-text completion, used by the open-ended strategy.
    pub async fn complete_text(&self, system: &str, user: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.2
        });
        self.chat(payload).await
    }

    /// JSON-object completion, used by the essay strategy.
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<JsonValue> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.2
        });
        let content = self.chat(payload).await?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Oracle(format!("Reply is not valid JSON: {}", e)))
    }

    async fn chat(&self, payload: JsonValue) -> Result<String> {
        let res = self
            .client
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(Error::Oracle(format!("API error {}: {}", status, text)));
        }

        let body: JsonValue = res.json().await?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Oracle("Response has no message content".to_string()))
    }
}
