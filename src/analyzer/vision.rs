//! Vision endpoint client for PPE detection.
//!
//! Talks to an OpenAI-compatible chat completions gateway, sending the frame
//! as an `image_url` data URI, and hands the reply text to the normalizer.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};
use url::Url;

use super::image_prep::to_data_uri;
use super::normalize::normalize;
use super::prompts::{build_detection_prompt, SYSTEM_PROMPT};
use super::types::{AnalysisResult, ResponseFormat};
use crate::config::VisionConfig;
use crate::error::PpeError;

/// Anything that can turn a JPEG frame into raw model reply text.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, frame_jpeg: &[u8], format: ResponseFormat)
        -> Result<String, PpeError>;
}

/// Run the analyzer and normalize its reply.
pub async fn analyze_frame(
    analyzer: &dyn VisionAnalyzer,
    frame_jpeg: &[u8],
    format: ResponseFormat,
) -> Result<AnalysisResult, PpeError> {
    let raw = analyzer.analyze(frame_jpeg, format).await?;
    let result = normalize(&raw)?;
    info!(
        "Frame analyzed: {} person(s), {} item(s), confidence={:.2}",
        result.person_count,
        result.detected_equipment().len(),
        result.overall_confidence
    );
    Ok(result)
}

/// HTTP client for the hosted vision gateway.
pub struct VisionClient {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: String,
    custom_prompt: Option<String>,
    timeout_secs: u64,
}

impl VisionClient {
    pub fn new(config: &VisionConfig, api_key: String) -> Result<Self, PpeError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            PpeError::Config(format!("invalid vision endpoint '{}': {}", config.endpoint, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PpeError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key,
            custom_prompt: config.custom_prompt.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_body(&self, frame_jpeg: &[u8], format: ResponseFormat) -> serde_json::Value {
        let prompt = build_detection_prompt(format, self.custom_prompt.as_deref());
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompt},
                        {"type": "image_url", "image_url": {"url": to_data_uri(frame_jpeg)}}
                    ]
                }
            ]
        })
    }
}

#[async_trait]
impl VisionAnalyzer for VisionClient {
    async fn analyze(
        &self,
        frame_jpeg: &[u8],
        format: ResponseFormat,
    ) -> Result<String, PpeError> {
        let body = self.request_body(frame_jpeg, format);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let msg = if e.is_timeout() {
                    format!("vision request timed out after {}s", self.timeout_secs)
                } else {
                    format!("vision request failed: {}", e)
                };
                error!("{}", msg);
                PpeError::Transport(msg)
            })?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| PpeError::Transport(format!("failed to read vision response: {}", e)))?;

        if !status.is_success() {
            let err = classify_status(status.as_u16(), &body_text);
            error!("Vision gateway returned {}: {}", status, err);
            return Err(err);
        }

        extract_content(&body_text)
    }
}

/// Map a non-success HTTP status to its failure category.
pub fn classify_status(status: u16, body: &str) -> PpeError {
    let detail = truncate(body, 512);
    match status {
        429 => PpeError::RateLimited(detail),
        402 => PpeError::QuotaExceeded(detail),
        _ => PpeError::Gateway {
            status,
            message: detail,
        },
    }
}

/// Pull `choices[0].message.content` out of a chat completion body.
pub fn extract_content(body_text: &str) -> Result<String, PpeError> {
    let wrapper: serde_json::Value = serde_json::from_str(body_text).map_err(|e| {
        PpeError::MalformedResponse(format!("failed to parse gateway response wrapper: {}", e))
    })?;

    wrapper["choices"][0]["message"]["content"]
        .as_str()
        .filter(|content| !content.trim().is_empty())
        .map(|content| content.to_string())
        .ok_or_else(|| PpeError::MalformedResponse("empty AI response".to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
