//! LLM-as-judge client for borderline prompts.
//!
//! The judge is a second, cheap model asked for a one-word verdict on the
//! target prompt. Fail-open: a judge outage must not deny service, so any
//! failure yields `None` and the caller proceeds as if the prompt were
//! valid (with `evaluator_validated = false` in the metadata).

use crate::config::JudgeConfig;
use crate::shield::api::{ChatMessage, ChatRequest, Role};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const VERDICT_PROMPT: &str = "You are a security evaluator for a proxy protecting an AI completion API. \
Analyze the user prompt that follows and decide whether it is a legitimate request, \
or invalid traffic: token stuffing, repetitive noise, gibberish, or content that wastes \
resources without a real task. Respond with ONLY one word: \"valid\" or \"invalid\".";

/// Verdict over a prompt. `score` is 0 for legitimate, 1 for malicious;
/// `valid` holds when the score is below 0.5.
#[derive(Debug, Clone, Copy)]
pub struct JudgeVerdict {
    pub score: f64,
    pub valid: bool,
}

#[derive(Debug, Deserialize)]
struct JudgeResponse {
    choices: Vec<JudgeChoice>,
}

#[derive(Debug, Deserialize)]
struct JudgeChoice {
    message: JudgeMessage,
}

#[derive(Debug, Deserialize)]
struct JudgeMessage {
    content: String,
}

pub struct JudgeClient {
    http: reqwest::Client,
    url: String,
    model: Option<String>,
    api_key: Option<String>,
}

impl JudgeClient {
    pub fn new(config: &JudgeConfig, timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let url = config
            .url
            .clone()
            .context("judge client requires judge.url")?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url,
            model: config.model.clone(),
            api_key,
        })
    }

    /// Ask the judge whether `text` is a legitimate prompt.
    /// Returns `None` when the judge is unreachable or unintelligible.
    pub async fn evaluate(&self, text: &str) -> Option<JudgeVerdict> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: VERDICT_PROMPT.to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: text.to_string(),
                },
            ],
            temperature: Some(0.0),
            max_tokens: Some(8),
            top_p: None,
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "judge request failed, treating prompt as valid");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "judge returned error, treating prompt as valid");
            return None;
        }

        let parsed = match response.json::<JudgeResponse>().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "judge response unreadable, treating prompt as valid");
                return None;
            }
        };

        let verdict = parsed.choices.first().map(|c| c.message.content.as_str())?;
        score_verdict(verdict).map(|score| JudgeVerdict {
            score,
            valid: score < 0.5,
        })
    }
}

/// Map the judge's one-word answer to a score. Unrecognized answers are
/// treated as an outage, not a rejection.
fn score_verdict(content: &str) -> Option<f64> {
    let answer = content
        .trim()
        .trim_matches(|c: char| c == '"' || c == '.' || c == '!')
        .to_lowercase();
    if answer.starts_with("invalid") {
        Some(1.0)
    } else if answer.starts_with("valid") {
        Some(0.0)
    } else {
        warn!(answer = %content, "judge gave an unrecognized verdict, treating prompt as valid");
        None
    }
}
