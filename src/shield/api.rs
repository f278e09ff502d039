//! Chat-completion wire types.
//!
//! The inbound request and the upstream response are explicit structs; a
//! provider payload that does not match the expected shape is a loud error,
//! never a silent fallback.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Inbound chat-completion request. The target message is the final entry,
/// which must carry role `user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl ChatRequest {
    /// The final message, when it is a user message.
    pub fn target(&self) -> Option<&ChatMessage> {
        self.messages.last().filter(|m| m.role == Role::User)
    }

    /// Validate sampling parameter ranges.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err("temperature must be within [0, 1]".to_string());
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err("top_p must be within [0, 1]".to_string());
            }
        }
        if self.max_tokens == Some(0) {
            return Err("max_tokens must be positive".to_string());
        }
        Ok(())
    }

    /// Copy of this request with the target message content replaced.
    /// All other messages, including any system prompt, pass through
    /// unchanged.
    pub fn with_target_content(&self, content: String) -> ChatRequest {
        let mut rewritten = self.clone();
        if let Some(last) = rewritten.messages.last_mut() {
            last.content = content;
        }
        rewritten
    }
}

/// Upstream completion response, parsed for usage extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Parsed for shape validation; clients read the raw passthrough body.
    #[allow(dead_code)]
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Whitespace-delimited token estimate, used for savings percentages when
/// the sieve reports raw counts.
pub fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
