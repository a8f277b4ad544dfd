//! OpenAI-compatible chat completion client for the reasoning service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use resilience::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::client::ReasoningClient;
use crate::config::ReasoningSettings;
use crate::error::{AnalysisError, Result};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Reasoning client speaking the OpenAI chat completion protocol
#[derive(Debug, Clone)]
pub struct OpenAiReasoningClient {
    http_client: Client,
    settings: ReasoningSettings,
}

impl OpenAiReasoningClient {
    /// Build a client. `request_timeout` bounds a single HTTP exchange.
    pub fn new(settings: ReasoningSettings, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("frame-analysis/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalysisError::configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

/// Classify a non-success HTTP status
pub fn classify_status(status: StatusCode, body: &str) -> ServiceError {
    let message = format!("{}: {}", status, body.chars().take(200).collect::<String>());

    match status {
        StatusCode::TOO_MANY_REQUESTS => ServiceError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ServiceError::timeout(message),
        s if s.is_server_error() => ServiceError::transient(message),
        _ => ServiceError::permanent(message),
    }
}

fn classify_transport(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        ServiceError::timeout(error.to_string())
    } else if error.is_connect() || error.is_request() {
        ServiceError::transient(error.to_string())
    } else {
        ServiceError::permanent(error.to_string())
    }
}

#[async_trait]
impl ReasoningClient for OpenAiReasoningClient {
    async fn infer(&self, image: &str, prompt: &str) -> std::result::Result<String, ServiceError> {
        let request = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image } },
                ],
            })],
            max_tokens: self.settings.max_tokens,
            temperature: 0.2,
        };

        let mut builder = self.http_client.post(self.endpoint()).json(&request);
        if let Some(ref api_key) = self.settings.api_key {
            builder = builder.bearer_auth(api_key);
        }

        debug!(model = %self.settings.model, "Sending chat completion request");
        let response = builder.send().await.map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, &body);
            warn!(status = status.as_u16(), error = %error, "Reasoning service returned an error");
            return Err(error);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::permanent(format!("malformed completion body: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::permanent("completion contained no message content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resilience::ErrorKind;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").kind(), ErrorKind::RateLimited);
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT, "").kind(), ErrorKind::Timeout);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT, "").kind(), ErrorKind::Timeout);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY, "").kind(), ErrorKind::TransientNetwork);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED, "bad key").kind(), ErrorKind::Permanent);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST, "").kind(), ErrorKind::Permanent);
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = OpenAiReasoningClient::new(
            ReasoningSettings {
                base_url: "http://localhost:8080/v1/".to_string(),
                ..ReasoningSettings::default()
            },
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
