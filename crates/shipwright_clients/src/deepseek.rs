//! Chat-completions client for DeepSeek (or any OpenAI-compatible endpoint).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shipwright_core::prompts::{self, PRE_VERIFY_REQUEST};
use shipwright_core::{CoreError, CoreResult, Generator, VerificationSubject};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::settings::LlmSettings;

/// Attempts per request, the first one included.
const MAX_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Language-model collaborator with conversation memory.
///
/// A call carrying a non-empty codebase starts a fresh conversation whose
/// system prompt embeds that codebase; calls without one continue the
/// current conversation, so a deployment review sees the turns that
/// produced the code.
pub struct DeepSeekClient {
    settings: LlmSettings,
    api_key: String,
    client: reqwest::Client,
    history: Mutex<Vec<ChatMessage>>,
    backoff_base: Duration,
}

impl DeepSeekClient {
    pub fn new(settings: LlmSettings) -> ClientResult<Self> {
        let api_key = settings
            .api_key
            .expose()
            .ok_or_else(|| ClientError::MissingConfig(vec![crate::settings::DEEPSEEK_API_KEY.to_string()]))?
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            settings,
            api_key,
            client,
            history: Mutex::new(Vec::new()),
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Base delay between attempts; doubled after every failure.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().clone()
    }

    pub fn reset_conversation(&self) {
        self.history.lock().clear();
    }

    /// Send `message`, resetting the conversation when `codebase` is given.
    pub async fn chat(&self, message: &str, codebase: Option<&str>) -> ClientResult<String> {
        let messages = {
            let mut history = self.history.lock();
            let fresh_context = codebase.filter(|c| !c.is_empty());
            if history.is_empty() || fresh_context.is_some() {
                history.clear();
                history.push(ChatMessage::new(
                    "system",
                    prompts::system_prompt(fresh_context.unwrap_or_default()),
                ));
            }
            history.push(ChatMessage::new("user", message));
            history.clone()
        };

        let request = ChatRequest {
            model: &self.settings.model,
            messages: &messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let reply = self.complete(&request).await?;

        self.history
            .lock()
            .push(ChatMessage::new("assistant", reply.clone()));
        Ok(reply)
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> ClientResult<String> {
        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = self.backoff_base * (1 << (attempt - 1));
                debug!("Retrying chat completion in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
            match self.send_once(request).await {
                Ok(content) => return Ok(content),
                Err(err) if err.is_transient() => {
                    warn!(
                        "Chat completion attempt {}/{} failed: {}",
                        attempt + 1,
                        MAX_ATTEMPTS,
                        err
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| ClientError::Network("Max retries exceeded".to_string())))
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> ClientResult<String> {
        let response = self
            .client
            .post(&self.settings.api_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                service: "DeepSeek",
                status: status.as_u16(),
                body,
            });
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClientError::InvalidResponse("No choices in response".to_string()))
    }
}

#[async_trait]
impl Generator for DeepSeekClient {
    async fn generate(&self, prompt: &str, tree_context: &str) -> CoreResult<String> {
        self.chat(prompt, Some(tree_context))
            .await
            .map_err(|e| CoreError::Generation(e.to_string()))
    }

    async fn verify(&self, subject: &VerificationSubject) -> CoreResult<String> {
        let result = match subject {
            VerificationSubject::Tree { context } => {
                self.chat(PRE_VERIFY_REQUEST, Some(context)).await
            }
            VerificationSubject::Deployment(_) => {
                self.chat(&prompts::verification_prompt(subject), None).await
            }
        };
        result.map_err(|e| CoreError::Generation(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Secret;

    fn settings() -> LlmSettings {
        LlmSettings {
            api_key: Secret::new("sk-test"),
            ..LlmSettings::default()
        }
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let result = DeepSeekClient::new(LlmSettings::default());
        assert!(matches!(result, Err(ClientError::MissingConfig(_))));
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::new("user", "hi")];
        let request = ChatRequest {
            model: "deepseek-coder",
            messages: &messages,
            temperature: 0.3,
            max_tokens: 8000,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "deepseek-coder");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 8000);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"ok"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "ok");
    }

    #[test]
    fn test_reset_conversation() {
        let client = DeepSeekClient::new(settings()).unwrap();
        client.history.lock().push(ChatMessage::new("user", "x"));
        client.reset_conversation();
        assert!(client.history().is_empty());
    }
}
