//! Shannon entropy scoring for prompt classification.
//!
//! Entropy is computed over Unicode codepoint frequencies. Low-entropy text
//! reads like language; very high entropy means the prompt is dominated by
//! noise (random payloads, token stuffing with unique symbols).

use crate::config::EntropyConfig;
use serde::Serialize;
use std::collections::HashMap;

/// Three-way classification of the target prompt by entropy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Clean,
    Suspicious,
    Weird,
}

/// Shannon entropy `H = -Σ p_i · log2(p_i)` over codepoint frequencies.
/// The empty string scores 0.
pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let total = total as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

pub fn classify(entropy: f64, config: &EntropyConfig) -> ThreatLevel {
    if entropy > config.weird_min {
        ThreatLevel::Weird
    } else if entropy > config.clean_max {
        ThreatLevel::Suspicious
    } else {
        ThreatLevel::Clean
    }
}
