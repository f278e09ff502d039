//! Signature scan for role-hijack and instruction-override prompts.
//!
//! Patterns come from configuration and are compiled once at startup; the
//! per-request path is match-only. Families are checked in order and the
//! first match wins.

use crate::config::SecurityConfig;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFamily {
    RoleHijack,
    InstructionOverride,
}

/// A pattern hit: which family fired and the fragment that matched.
#[derive(Debug, Clone)]
pub struct SignatureMatch {
    pub family: SignatureFamily,
    pub fragment: String,
}

pub struct SignatureScanner {
    role_hijack: Vec<Regex>,
    instruction_override: Vec<Regex>,
}

impl SignatureScanner {
    pub fn new(config: &SecurityConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            role_hijack: compile(&config.role_hijack)?,
            instruction_override: compile(&config.instruction_override)?,
        })
    }

    /// Scan a prompt. Role-hijack patterns are checked before
    /// instruction-override patterns.
    pub fn scan(&self, text: &str) -> Option<SignatureMatch> {
        for (family, patterns) in [
            (SignatureFamily::RoleHijack, &self.role_hijack),
            (SignatureFamily::InstructionOverride, &self.instruction_override),
        ] {
            for pattern in patterns {
                if let Some(m) = pattern.find(text) {
                    return Some(SignatureMatch {
                        family,
                        fragment: m.as_str().to_string(),
                    });
                }
            }
        }
        None
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)))
        .collect()
}
