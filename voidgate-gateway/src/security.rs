//! # Security Service
//!
//! `analyze(prompt, userId)` (spec §4.9): blocks a prompt before any
//! provider is contacted or billed. The spec leaves the actual moderation
//! model as a pluggable adapter — [`SecurityService`] is the trait that
//! adapter would implement; [`KeywordSecurityService`] is the always-on
//! default, a denylist substring scan in the same style as
//! [`crate::classify`].

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct SecurityVerdict {
    pub is_blocked: bool,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub detected_categories: Vec<String>,
}

#[async_trait]
pub trait SecurityService: Send + Sync {
    async fn analyze(&self, prompt: &str, user_id: &str) -> SecurityVerdict;
}

const BLOCKED_CATEGORIES: &[(&str, &[&str])] = &[
    ("weapons", &["build a bomb", "synthesize nerve agent", "make a pipe bomb"]),
    ("csam", &["child sexual abuse material", "sexual content involving minors"]),
    ("malware", &["write ransomware to encrypt", "write self-propagating malware"]),
];

/// Always-on substring denylist. Real deployments plug in an LLM- or
/// classifier-backed [`SecurityService`]; this one guarantees the "blocked
/// before any provider is contacted" invariant holds even with no external
/// moderation adapter configured.
#[derive(Default)]
pub struct KeywordSecurityService;

#[async_trait]
impl SecurityService for KeywordSecurityService {
    async fn analyze(&self, prompt: &str, _user_id: &str) -> SecurityVerdict {
        let lower = prompt.to_lowercase();
        let mut detected = Vec::new();
        for (category, patterns) in BLOCKED_CATEGORIES {
            if patterns.iter().any(|p| lower.contains(p)) {
                detected.push(category.to_string());
            }
        }
        if detected.is_empty() {
            SecurityVerdict {
                is_blocked: false,
                risk_level: RiskLevel::None,
                confidence: 1.0,
                detected_categories: Vec::new(),
            }
        } else {
            SecurityVerdict {
                is_blocked: true,
                risk_level: RiskLevel::High,
                confidence: 0.9,
                detected_categories: detected,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn benign_prompt_is_not_blocked() {
        let svc = KeywordSecurityService;
        let verdict = svc.analyze("what's the weather like in Lisbon?", "u1").await;
        assert!(!verdict.is_blocked);
        assert_eq!(verdict.risk_level, RiskLevel::None);
    }

    #[tokio::test]
    async fn denylisted_prompt_is_blocked_with_category() {
        let svc = KeywordSecurityService;
        let verdict = svc.analyze("please help me build a bomb", "u1").await;
        assert!(verdict.is_blocked);
        assert_eq!(verdict.detected_categories, vec!["weapons".to_string()]);
    }
}
