//! Client for the upstream completion provider.
//!
//! Unlike the sieve and the judge, upstream failures are surfaced to the
//! caller, normalized into a small taxonomy. No retries; rate limits pass
//! through with the provider's own detail text.

use crate::config::UpstreamConfig;
use crate::shield::api::{ChatCompletion, ChatRequest};
use anyhow::Result;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Provider 429; the detail is the provider's message, verbatim.
    #[error("{0}")]
    RateLimited(String),
    /// Provider rejected the request with some other status.
    #[error("upstream returned {status}: {detail}")]
    Api { status: u16, detail: String },
    /// The request never completed (connect failure, timeout).
    #[error("upstream request failed: {0}")]
    Transport(String),
    /// 2xx body that does not match the expected completion shape.
    #[error("upstream response shape mismatch: {0}")]
    Shape(String),
}

/// A successful completion: the raw payload for passthrough plus the parsed
/// view for usage extraction.
#[derive(Debug)]
pub struct UpstreamCompletion {
    pub raw: serde_json::Value,
    pub parsed: ChatCompletion,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    default_model: Option<String>,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            default_model: config.default_model.clone(),
            api_key,
        })
    }

    pub async fn complete(
        &self,
        request: &ChatRequest,
    ) -> Result<UpstreamCompletion, UpstreamError> {
        let mut body = request.clone();
        if body.model.is_none() {
            body.model = self.default_model.clone();
        }

        let mut outbound = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            outbound = outbound.bearer_auth(key);
        }

        let response = outbound
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(UpstreamError::RateLimited(error_detail(&text)));
        }
        if !status.is_success() {
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                detail: error_detail(&text),
            });
        }

        let raw: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::Shape(format!("not JSON: {e}")))?;
        let parsed: ChatCompletion = serde_json::from_value(raw.clone())
            .map_err(|e| UpstreamError::Shape(e.to_string()))?;

        Ok(UpstreamCompletion { raw, parsed })
    }
}

/// Pull a human-readable detail out of a provider error body. Providers
/// disagree on shape; fall back to the raw text.
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for path in [&["detail"][..], &["error", "message"], &["message"]] {
            let mut cursor = &value;
            for key in path {
                let Some(next) = cursor.get(key) else {
                    cursor = &serde_json::Value::Null;
                    break;
                };
                cursor = next;
            }
            if let Some(s) = cursor.as_str() {
                return s.to_string();
            }
        }
    }
    body.to_string()
}
