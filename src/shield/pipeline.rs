//! The request pipeline: a deterministic decision machine.
//!
//! Stages run in a fixed order, each able to short-circuit with a block:
//!
//! 1. target extraction and parameter validation
//! 2. signature scan (role hijack, instruction override)
//! 3. entropy classification (WEIRD blocks)
//! 4. compression level selection (penalty box check)
//! 5. judge adjudication (SUSPICIOUS only, fail-open)
//! 6. sieve compression (fail-open, negative savings clamped)
//! 7. target rewrite with the system prompt pinned
//!
//! A blocked request never reaches the upstream model. Offenses observed
//! along the way are recorded against the caller's fingerprint even when
//! the request ultimately fails; they represent observed behavior.

use crate::config::{CompressionConfig, EntropyConfig};
use crate::shield::api::{estimate_tokens, ChatMessage, ChatRequest};
use crate::shield::entropy::{classify, shannon_entropy, ThreatLevel};
use crate::shield::identity::CallerIdentity;
use crate::shield::judge::JudgeClient;
use crate::shield::penalty::{
    PenaltyStore, WEIGHT_ATTACK, WEIGHT_JUDGE, WEIGHT_SIGNATURE, WEIGHT_WEIRD,
};
use crate::shield::sieve::SieveClient;
use crate::shield::signatures::{SignatureFamily, SignatureScanner};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Binary attack likelihood derived from the compression savings ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttackProbability {
    Low,
    High,
}

/// What the shield did to a request, attached to every response under the
/// `llm_shield` key. Fields a blocking stage never reached hold these
/// defaults.
#[derive(Debug, Clone, Serialize)]
pub struct ShieldMetadata {
    pub threat_level: ThreatLevel,
    pub entropy_score: f64,
    pub attack_probability: AttackProbability,
    pub tokens_saved: u64,
    pub savings_pct: f64,
    pub evaluator_validated: bool,
    pub evaluator_score: f64,
    pub compression_level: f64,
    pub user_penalty_applied: bool,
}

impl ShieldMetadata {
    fn with_base_level(base_level: f64) -> Self {
        Self {
            threat_level: ThreatLevel::Clean,
            entropy_score: 0.0,
            attack_probability: AttackProbability::Low,
            tokens_saved: 0,
            savings_pct: 0.0,
            evaluator_validated: true,
            evaluator_score: 0.0,
            compression_level: base_level,
            user_penalty_applied: false,
        }
    }
}

/// Why a request was blocked. The HTTP layer maps kinds to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    BadRequest,
    EntropyWeird,
    SecurityHijack,
    SecurityOverride,
    JudgeRejected,
}

#[derive(Debug)]
pub enum Decision {
    /// Forward the (possibly rewritten) request upstream.
    Allow {
        request: ChatRequest,
        metadata: ShieldMetadata,
    },
    /// Reject without an upstream call.
    Block {
        kind: BlockKind,
        detail: String,
        metadata: ShieldMetadata,
    },
}

pub struct Pipeline {
    entropy: EntropyConfig,
    compression: CompressionConfig,
    scanner: SignatureScanner,
    judge_enabled: bool,
    penalties: Arc<PenaltyStore>,
    sieve: SieveClient,
    judge: Option<JudgeClient>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entropy: EntropyConfig,
        compression: CompressionConfig,
        scanner: SignatureScanner,
        judge_enabled: bool,
        penalties: Arc<PenaltyStore>,
        sieve: SieveClient,
        judge: Option<JudgeClient>,
    ) -> Self {
        Self {
            entropy,
            compression,
            scanner,
            judge_enabled: judge_enabled && judge.is_some(),
            penalties,
            sieve,
            judge,
        }
    }

    /// Run all stages for one request. The only suspension points are the
    /// judge and sieve calls; no lock is held across either.
    pub async fn decide(
        &self,
        request: &ChatRequest,
        identity: &CallerIdentity,
        now: Instant,
    ) -> Decision {
        let fingerprint = identity.fingerprint();
        let mut meta = ShieldMetadata::with_base_level(self.compression.base_level);

        // Stage 1: target extraction
        let target = match extract_target(request) {
            Ok(message) => message,
            Err(detail) => {
                debug!(fingerprint = %fingerprint, detail = %detail, "bad request");
                return Decision::Block {
                    kind: BlockKind::BadRequest,
                    detail,
                    metadata: meta,
                };
            }
        };
        if let Err(detail) = request.validate() {
            return Decision::Block {
                kind: BlockKind::BadRequest,
                detail,
                metadata: meta,
            };
        }
        let prompt = target.content.as_str();

        // Stage 2: signature scan
        if let Some(hit) = self.scanner.scan(prompt) {
            self.penalties
                .record_offense(&fingerprint, WEIGHT_SIGNATURE, now);
            warn!(
                fingerprint = %fingerprint,
                family = ?hit.family,
                fragment = %hit.fragment,
                "signature block"
            );
            let (kind, detail) = match hit.family {
                SignatureFamily::RoleHijack => (
                    BlockKind::SecurityHijack,
                    "Security Block: Role Hijacking Detected".to_string(),
                ),
                SignatureFamily::InstructionOverride => (
                    BlockKind::SecurityOverride,
                    "Security Block: Instruction Override Detected".to_string(),
                ),
            };
            return Decision::Block {
                kind,
                detail,
                metadata: meta,
            };
        }

        // Stage 3: entropy classification
        let entropy_score = shannon_entropy(prompt);
        meta.entropy_score = entropy_score;
        meta.threat_level = classify(entropy_score, &self.entropy);
        if meta.threat_level == ThreatLevel::Weird {
            self.penalties.record_offense(&fingerprint, WEIGHT_WEIRD, now);
            warn!(
                fingerprint = %fingerprint,
                entropy = entropy_score,
                "weird entropy block"
            );
            return Decision::Block {
                kind: BlockKind::EntropyWeird,
                detail: format!(
                    "WEIRD prompt detected (H > {}). Blocked to prevent DDoS.",
                    self.entropy.weird_min
                ),
                metadata: meta,
            };
        }

        // Stage 4: compression level selection
        let penalised = self.penalties.is_penalised(&fingerprint, now);
        let (level, penalty_applied) =
            select_level(penalised, meta.threat_level, &self.compression);
        meta.compression_level = level;
        meta.user_penalty_applied = penalty_applied;

        // Stage 5: judge, for SUSPICIOUS prompts only
        let judge = self
            .judge
            .as_ref()
            .filter(|_| self.judge_enabled && meta.threat_level == ThreatLevel::Suspicious);
        if let Some(judge) = judge {
            match judge.evaluate(prompt).await {
                Some(verdict) => {
                    meta.evaluator_score = verdict.score;
                    meta.evaluator_validated = verdict.valid;
                    if !verdict.valid {
                        self.penalties
                            .record_offense(&fingerprint, WEIGHT_JUDGE, now);
                        info!(
                            fingerprint = %fingerprint,
                            score = verdict.score,
                            "judge rejected prompt"
                        );
                        return Decision::Block {
                            kind: BlockKind::JudgeRejected,
                            detail: "Security Block: Prompt Rejected By Evaluator".to_string(),
                            metadata: meta,
                        };
                    }
                }
                // Outage: proceed as valid, but say the judge never ran.
                None => meta.evaluator_validated = false,
            }
        }

        // Stage 6: compression
        let original_tokens = estimate_tokens(prompt);
        let mut compressed_text = None;
        if let Some(output) = self.sieve.compress(prompt, level).await {
            if output.tokens_saved_estimate > 0 && !output.text.trim().is_empty() {
                meta.tokens_saved = output.tokens_saved_estimate as u64;
                meta.savings_pct = if original_tokens > 0 {
                    100.0 * meta.tokens_saved as f64 / original_tokens as f64
                } else {
                    0.0
                };
                compressed_text = Some(output.text);
            }
        }
        if compressed_text.is_some() && meta.savings_pct >= self.compression.attack_threshold_pct {
            meta.attack_probability = AttackProbability::High;
            self.penalties
                .record_offense(&fingerprint, WEIGHT_ATTACK, now);
            info!(
                fingerprint = %fingerprint,
                savings_pct = meta.savings_pct,
                "high attack probability"
            );
        }

        // Stage 7: rewrite, system prompt pinned
        let rewritten = match compressed_text {
            Some(text) => request.with_target_content(text),
            None => request.clone(),
        };

        debug!(
            fingerprint = %fingerprint,
            threat_level = ?meta.threat_level,
            entropy = meta.entropy_score,
            level = meta.compression_level,
            tokens_saved = meta.tokens_saved,
            "request allowed"
        );
        Decision::Allow {
            request: rewritten,
            metadata: meta,
        }
    }
}

/// Stage 1: the final message must be a user message with content.
fn extract_target(request: &ChatRequest) -> Result<&ChatMessage, String> {
    let target = request
        .target()
        .ok_or_else(|| "No messages found".to_string())?;
    if target.content.trim().is_empty() {
        return Err("Empty prompt".to_string());
    }
    Ok(target)
}

/// Stage 4: the penalty box dominates, then SUSPICIOUS, then baseline.
fn select_level(
    penalised: bool,
    threat_level: ThreatLevel,
    config: &CompressionConfig,
) -> (f64, bool) {
    if penalised {
        (config.base_level.max(config.penalised_level), true)
    } else if threat_level == ThreatLevel::Suspicious {
        (config.suspicious_level, false)
    } else {
        (config.base_level, false)
    }
}
