//! Language-model transport over an OpenAI-compatible
//! chat-completions endpoint.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Narrow transport seam: a fully-formed instruction prompt in, raw model
/// text out. Implementations may fail with transport-level faults; the
/// `Translator` converts those into explain-only candidates.
pub trait TextCompletion: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// HTTP transport backed by `ureq`.
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: Option<String>,
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

impl HttpTransport {
    /// Build a transport for `<base_url>/chat/completions`.
    ///
    /// The HTTP-level timeout is set slightly above the caller's worker
    /// timeout so the worker deadline is the one that fires.
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout + Duration::from_secs(5)))
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        }
    }
}

impl TextCompletion for HttpTransport {
    fn complete(&self, prompt: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut request = self.agent.post(&self.endpoint);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", &format!("Bearer {}", key));
        }

        let mut response = request
            .send_json(&payload)
            .with_context(|| format!("Request to {} failed", self.endpoint))?;

        let parsed: ChatResponse = response
            .body_mut()
            .read_json()
            .context("Model response was not valid JSON")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Model response contained no choices"))
    }
}
