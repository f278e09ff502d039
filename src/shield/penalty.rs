//! Per-fingerprint penalty scores with exponential time decay.
//!
//! Offenses add a weighted amount to the caller's score; the score halves
//! every `half_life_seconds`. A caller whose decayed score reaches the
//! threshold is in the penalty box and gets aggressive compression.
//!
//! The store is the only shared mutable state in the process. All
//! operations take and release the lock synchronously; nothing holds it
//! across an await point. Scores are advisory: two concurrent requests may
//! both read "not penalised" and both record an offense, and the next
//! request observes both.

use crate::config::PenaltyConfig;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Offense weight for a signature-scanner block.
pub const WEIGHT_SIGNATURE: f64 = 3.0;
/// Offense weight for a WEIRD entropy block.
pub const WEIGHT_WEIRD: f64 = 2.0;
/// Offense weight for a HIGH attack probability (forwarded request).
pub const WEIGHT_ATTACK: f64 = 1.0;
/// Offense weight for a judge rejection.
pub const WEIGHT_JUDGE: f64 = 1.5;

/// Decayed scores below this are indistinguishable from zero; such records
/// are dropped on access unless they still carry token accounting.
const SCORE_EPSILON: f64 = 0.01;

#[derive(Debug, Clone)]
struct PenaltyRecord {
    score: f64,
    last_update: Instant,
    token_cost_accumulated: u64,
}

pub struct PenaltyStore {
    half_life_secs: f64,
    threshold: f64,
    records: Mutex<HashMap<String, PenaltyRecord>>,
}

impl PenaltyStore {
    pub fn new(config: &PenaltyConfig) -> Self {
        Self {
            half_life_secs: config.half_life_seconds as f64,
            threshold: config.threshold,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Current decayed score for a fingerprint; 0 when unknown.
    pub fn penalty(&self, fingerprint: &str, now: Instant) -> f64 {
        let mut records = self.lock();
        let Some(record) = records.get_mut(fingerprint) else {
            return 0.0;
        };

        let effective = self.decayed(record, now);
        if effective < SCORE_EPSILON {
            if record.token_cost_accumulated == 0 {
                records.remove(fingerprint);
            } else {
                record.score = 0.0;
            }
            return 0.0;
        }
        effective
    }

    /// Fold an offense into the score: `score ← decayed(score) + weight`.
    pub fn record_offense(&self, fingerprint: &str, weight: f64, now: Instant) {
        let mut records = self.lock();
        let record = records
            .entry(fingerprint.to_string())
            .or_insert_with(|| PenaltyRecord {
                score: 0.0,
                last_update: now,
                token_cost_accumulated: 0,
            });
        record.score = self.decayed(record, now) + weight;
        record.last_update = now;
    }

    /// Accumulate upstream token usage for observability. Does not change
    /// the score.
    pub fn record_token_cost(&self, fingerprint: &str, tokens: u64, now: Instant) {
        let mut records = self.lock();
        let record = records
            .entry(fingerprint.to_string())
            .or_insert_with(|| PenaltyRecord {
                score: 0.0,
                last_update: now,
                token_cost_accumulated: 0,
            });
        record.token_cost_accumulated += tokens;
    }

    /// Accumulated upstream tokens for a fingerprint.
    pub fn token_cost(&self, fingerprint: &str) -> u64 {
        self.lock()
            .get(fingerprint)
            .map(|r| r.token_cost_accumulated)
            .unwrap_or(0)
    }

    pub fn is_penalised(&self, fingerprint: &str, now: Instant) -> bool {
        self.penalty(fingerprint, now) >= self.threshold
    }

    fn decayed(&self, record: &PenaltyRecord, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(record.last_update).as_secs_f64();
        record.score * (-elapsed / self.half_life_secs).exp2()
    }

    /// A panic while the lock was held must not deny subsequent requests;
    /// a lost or stale offense is acceptable.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PenaltyRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
