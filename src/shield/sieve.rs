//! Client for the external compression ("sieve") service.
//!
//! One-shot and fail-open: a timeout, transport error, or non-2xx response
//! yields `None` and the caller falls back to the original text. The
//! service is never retried.

use crate::config::SieveConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Serialize)]
struct SieveRequest<'a> {
    text: &'a str,
    level: f64,
}

#[derive(Debug, Deserialize)]
struct SieveResponse {
    compressed_text: String,
    tokens_saved_estimate: i64,
}

/// Successful compression output. The estimate may still be non-positive;
/// the pipeline decides whether to use it.
#[derive(Debug, Clone)]
pub struct Compressed {
    pub text: String,
    pub tokens_saved_estimate: i64,
}

pub struct SieveClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl SieveClient {
    pub fn new(config: &SieveConfig, timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            api_key,
        })
    }

    /// Compress `text` at the given aggressiveness level in [0, 1].
    /// Returns `None` on any failure.
    pub async fn compress(&self, text: &str, level: f64) -> Option<Compressed> {
        let mut request = self.http.post(&self.url).json(&SieveRequest { text, level });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "sieve request failed, using original text");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "sieve returned error, using original text");
            return None;
        }

        match response.json::<SieveResponse>().await {
            Ok(body) => Some(Compressed {
                text: body.compressed_text,
                tokens_saved_estimate: body.tokens_saved_estimate,
            }),
            Err(e) => {
                warn!(error = %e, "sieve response unreadable, using original text");
                None
            }
        }
    }
}
