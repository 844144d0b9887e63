//! HTTP-backed capability implementation.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint. Configuration is
//! read from the environment once at construction time:
//!
//! - `OPENAI_API_KEY`: API key (required; capability reports unavailable
//!   without it)
//! - `OPENAI_API_URL`: base URL (default: `https://api.openai.com/v1`)
//! - `CLASSIFIER_MODEL`: model for document classification fallback
//!   (default: `gpt-5`)
//! - `INSIGHT_MODEL`: model for the optional AI insight analyzer
//!   (default: same as `CLASSIFIER_MODEL`)
//! - `EMBEDDING_MODEL`: model for the optional vector-intent embedder
//!   (default: `text-embedding-3-small`)

use std::env;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::CapabilityError;
use crate::provider::{
    ClassificationPrompt, ClassificationSuggestion, DocumentClassifierCapability,
    EmbeddingCapability, InsightAnalyzerCapability, SuggestedInsight,
};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-5";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub classifier_model: String,
    pub insight_model: String,
    pub embedding_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("OPENAI_API_KEY").ok(),
            base_url: env::var("OPENAI_API_URL").unwrap_or_else(|_| DEFAULT_OPENAI_URL.to_string()),
            classifier_model: env::var("CLASSIFIER_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            insight_model: env::var("INSIGHT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCapability {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiCapability {
    pub fn new() -> Self {
        Self::with_config(OpenAiConfig::default())
    }

    pub fn with_config(config: OpenAiConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    fn call_chat(&self, model: &str, system: &str, user: &str) -> Result<String, CapabilityError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(CapabilityError::NotConfigured)?;
        let url = format!("{}/chat/completions", self.config.base_url);

        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_completion_tokens: 1024,
        };

        debug!("calling chat completions at {} with model {}", url, model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(CapabilityError::BadResponse { status, body });
        }

        let parsed: ChatResponse = response.json()?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

impl Default for OpenAiCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentClassifierCapability for OpenAiCapability {
    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn classify(
        &self,
        prompt: &ClassificationPrompt<'_>,
    ) -> Result<Option<ClassificationSuggestion>, CapabilityError> {
        if !DocumentClassifierCapability::is_available(self) {
            return Ok(None);
        }
        let system = format!(
            "Classify the freight document into exactly one of: {}. Respond with JSON {{\"label\": ..., \"confidence\": 0-100}}.",
            prompt.candidate_labels.join(", ")
        );
        let user = format!(
            "Subject: {}\n\nBody:\n{}\n\nAttachment text:\n{}",
            prompt.subject, prompt.body, prompt.attachment_text
        );
        let raw = match self.call_chat(&self.config.classifier_model, &system, &user) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("classifier capability call failed, passing through: {}", err);
                return Ok(None);
            }
        };
        match serde_json::from_str::<ClassificationSuggestion>(raw.trim()) {
            Ok(suggestion) => Ok(Some(ClassificationSuggestion {
                confidence: suggestion.confidence.min(80),
                ..suggestion
            })),
            Err(err) => {
                warn!("could not parse classifier response, passing through: {}", err);
                Ok(None)
            }
        }
    }
}

impl InsightAnalyzerCapability for OpenAiCapability {
    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn analyze(&self, context_summary: &str) -> Result<Vec<SuggestedInsight>, CapabilityError> {
        if !InsightAnalyzerCapability::is_available(self) {
            return Ok(Vec::new());
        }
        let system = "Given this shipment context, suggest up to 5 operational insights as a JSON array of {title, description, severity, confidence, priority_boost}. priority_boost must be 0-30.";
        let raw = match self.call_chat(&self.config.insight_model, system, context_summary) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("insight capability call failed, passing through: {}", err);
                return Ok(Vec::new());
            }
        };
        match serde_json::from_str::<Vec<SuggestedInsight>>(raw.trim()) {
            Ok(mut insights) => {
                insights.truncate(5);
                for insight in &mut insights {
                    insight.priority_boost = insight.priority_boost.min(30);
                }
                Ok(insights)
            }
            Err(err) => {
                warn!("could not parse insight response, passing through: {}", err);
                Ok(Vec::new())
            }
        }
    }
}

impl EmbeddingCapability for OpenAiCapability {
    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(CapabilityError::NotConfigured)?;
        let url = format!("{}/embeddings", self.config.base_url);

        let request = EmbeddingRequest {
            model: self.config.embedding_model.clone(),
            input: text.to_string(),
        };

        debug!("calling embeddings at {} with model {}", url, self.config.embedding_model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(CapabilityError::BadResponse { status, body });
        }

        let parsed: EmbeddingResponse = response.json()?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| CapabilityError::BadResponse {
                status: 200,
                body: "embeddings response contained no data".to_string(),
            })
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_capability_reports_unavailable() {
        let config = OpenAiConfig {
            api_key: None,
            base_url: DEFAULT_OPENAI_URL.to_string(),
            classifier_model: DEFAULT_MODEL.to_string(),
            insight_model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        };
        let capability = OpenAiCapability::with_config(config);
        assert!(!DocumentClassifierCapability::is_available(&capability));
        assert!(!EmbeddingCapability::is_available(&capability));
        assert!(EmbeddingCapability::embed(&capability, "hello").is_err());
        let prompt = ClassificationPrompt {
            subject: "",
            body: "",
            attachment_text: "",
            candidate_labels: &["booking_confirmation"],
        };
        let result = capability.classify(&prompt).unwrap();
        assert!(result.is_none());
    }
}
