use std::time::Duration;

use async_trait::async_trait;
use litscope_core::config::LlmConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{AiError, Result};

/// Per-call generation settings.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub system: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

impl GenerateOptions {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            system: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Text-generation collaborator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;

    /// Fails when the service is unreachable or the model is not installed.
    async fn health_check(&self) -> Result<()>;
}

// ─── Ollama ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: ModelOptions,
}

#[derive(Debug, Serialize)]
struct ModelOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for a local Ollama server (`/api/generate`, `/api/tags`).
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.model)
    }

    async fn post_generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system: options.system.as_deref(),
            stream: false,
            options: ModelOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "calling LLM");
        tokio::time::timeout(options.timeout, self.post_generate(prompt, options))
            .await
            .map_err(|_| AiError::Timeout(options.timeout))?
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AiError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let tags: Value = resp.json().await.map_err(|e| AiError::Parse(e.to_string()))?;
        let installed = tags
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .any(|name| model_matches(name, &self.model))
            })
            .unwrap_or(false);
        if !installed {
            return Err(AiError::ModelUnavailable(self.model.clone()));
        }
        Ok(())
    }
}

/// `llama3.1` matches `llama3.1:latest`; an explicit tag must match exactly.
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || (!wanted.contains(':') && installed.split(':').next() == Some(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn options() -> GenerateOptions {
        GenerateOptions {
            temperature: 0.2,
            max_tokens: 64,
            timeout: Duration::from_secs(5),
            system: Some("be brief".into()),
        }
    }

    #[tokio::test]
    async fn generate_posts_non_streaming_request() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/generate")
            .match_body(Matcher::PartialJson(json!({
                "model": "llama3.1",
                "stream": false,
                "system": "be brief",
                "options": {"num_predict": 64}
            })))
            .with_status(200)
            .with_body(json!({"model": "llama3.1", "response": "  A summary.  ", "done": true}).to_string())
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), "llama3.1").unwrap();
        let text = client.generate("Summarize", &options()).await.unwrap();

        assert_eq!(text, "A summary.");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn empty_response_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(json!({"response": ""}).to_string())
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), "llama3.1").unwrap();
        let err = client.generate("x", &options()).await.unwrap_err();
        assert!(matches!(err, AiError::EmptyResponse));
    }

    #[tokio::test]
    async fn server_error_carries_status() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/generate")
            .with_status(500)
            .with_body("model crashed")
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), "llama3.1").unwrap();
        let err = client.generate("x", &options()).await.unwrap_err();
        assert!(matches!(err, AiError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn health_check_requires_installed_model() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(json!({"models": [{"name": "llama3.1:latest"}, {"name": "mistral:7b"}]}).to_string())
            .expect_at_least(1)
            .create_async()
            .await;

        assert!(OllamaClient::new(&server.url(), "llama3.1").unwrap().health_check().await.is_ok());
        assert!(OllamaClient::new(&server.url(), "mistral:7b").unwrap().health_check().await.is_ok());
        let err = OllamaClient::new(&server.url(), "qwen2").unwrap().health_check().await.unwrap_err();
        assert!(matches!(err, AiError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_server_fails_health_check() {
        let client = OllamaClient::new("http://127.0.0.1:9", "llama3.1").unwrap();
        assert!(client.health_check().await.is_err());
    }
}
