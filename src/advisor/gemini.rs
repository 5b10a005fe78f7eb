use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{build_prompt, AdvisorError, RootCauseAdvisor};
use crate::config::AdvisorConfig;
use crate::metrics::{MetricKind, MetricSnapshot};

/// Advisor backed by the Gemini `generateContent` REST endpoint.
pub struct GeminiAdvisor {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiAdvisor {
    pub fn new(config: &AdvisorConfig) -> Result<Self, AdvisorError> {
        Self::with_api_key(config, config.api_key())
    }

    pub fn with_api_key(config: &AdvisorConfig, api_key: Option<String>) -> Result<Self, AdvisorError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout: config.timeout(),
        })
    }

    async fn generate(&self, api_key: &str, prompt: String) -> Result<String, AdvisorError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdvisorError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: GenerateResponse = resp.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(AdvisorError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl RootCauseAdvisor for GeminiAdvisor {
    async fn analyze(
        &self,
        metrics: &MetricSnapshot,
        issues: &[MetricKind],
        log_excerpt: &str,
    ) -> Result<String, AdvisorError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdvisorError::NotConfigured("no API key".to_string()))?;

        let prompt = build_prompt(metrics, issues, log_excerpt);
        debug!(model = %self.model, prompt_len = prompt.len(), "requesting root cause analysis");

        let text = tokio::time::timeout(self.timeout, self.generate(api_key, prompt))
            .await
            .map_err(|_| AdvisorError::Timeout(self.timeout.as_secs()))??;

        info!(model = %self.model, response_len = text.len(), "root cause analysis received");
        Ok(text)
    }
}
