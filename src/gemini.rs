//! Gemini API client for content analysis
//!
//! Uses a long-lived reqwest::Client for connection pooling. Every call is
//! bounded by the configured timeout.

use crate::analyzer::{AnalysisRequest, TextAnalyzer};
use crate::config::GeminiConfig;
use crate::error::ClassifierError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const SYSTEM_PROMPT: &str = r#"You are a clinical triage assistant for a student mental-health service.

Guidelines:
- Follow the output format in each request exactly
- Never add commentary, apologies or markdown
- When unsure about risk, prefer the higher of two plausible levels"#;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClassifierError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Generate a raw text response for a prompt
    pub async fn generate(&self, prompt: &str) -> Result<String, ClassifierError> {
        if !self.config.has_api_key() {
            return Err(ClassifierError::MissingApiKey);
        }

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 256,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        };

        let url = format!("{}?key={}", self.config.endpoint(), self.config.api_key);
        let timeout = self.config.timeout;
        let call = self.client.post(&url).json(&request).send();

        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ClassifierError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                if e.is_timeout() {
                    ClassifierError::Timeout(timeout.as_millis() as u64)
                } else {
                    ClassifierError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Gemini API error response: {}", body);
            return Err(ClassifierError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            ClassifierError::Malformed(format!("Gemini envelope: {}", e))
        })?;

        extract_text(&gemini_response)
    }
}

#[async_trait]
impl TextAnalyzer for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ClassifierError> {
        debug!(
            dimension = request.dimension.as_str(),
            model = %self.config.model,
            "Calling Gemini API"
        );
        self.generate(&request.prompt).await
    }
}

fn extract_text(response: &GeminiResponse) -> Result<String, ClassifierError> {
    let candidate = response
        .candidates
        .first()
        .ok_or(ClassifierError::EmptyResponse)?;

    let text = candidate
        .content
        .as_ref()
        .and_then(|c| c.parts.first())
        .map(|p| p.text.clone())
        .ok_or(ClassifierError::EmptyResponse)?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        debug!(finish_reason = reason, "Gemini response received");
    }

    Ok(text)
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Dimension;
    use crate::models::ContentKind;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Respond with only one word".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 256,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("Respond with only one word"));
        assert!(json.contains("generation_config"));
    }

    #[test]
    fn test_extract_text_from_envelope() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"critical"}]},"finishReason":"STOP"}]}"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(extract_text(&response).unwrap(), "critical");
    }

    #[test]
    fn test_blocked_candidate_is_empty_response() {
        let raw = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(extract_text(&response), Err(ClassifierError::EmptyResponse));

        let none: GeminiResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(extract_text(&none), Err(ClassifierError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new(GeminiConfig::new("")).unwrap();
        let request = AnalysisRequest {
            dimension: Dimension::Risk,
            kind: ContentKind::Journal,
            text: "hello".to_string(),
            prompt: "hello".to_string(),
        };
        let result = client.analyze(&request).await;
        assert_eq!(result, Err(ClassifierError::MissingApiKey));
    }
}
