//! # Error Classifier
//!
//! Maps free-form upstream error text into an [`ErrorKind`] and a
//! critical/non-critical label (spec §4.11) by case-insensitive substring
//! matching against fixed tables. Only critical errors trip a sub-provider's
//! circuit breaker; everything else just excludes that sub-provider for the
//! current request attempt.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthError,
    RateLimit,
    Timeout,
    Network,
    ServerError,
    Other,
}

const AUTH_PATTERNS: &[&str] = &["401", "403", "api key", "invalid api key", "incorrect api key", "unauthorized"];
const RATE_LIMIT_PATTERNS: &[&str] = &["429", "quota", "rate limit", "too many requests"];
const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const NETWORK_PATTERNS: &[&str] = &["connection refused", "connection reset", "dns", "network"];
const SERVER_ERROR_PATTERNS: &[&str] = &["500", "502", "503", "504", "internal server error", "service unavailable", "bad gateway"];

/// Patterns that indicate the sub-provider credential/account itself is
/// unhealthy (spec §4.11 "critical").
const CRITICAL_PATTERNS: &[&str] = &[
    "invalid api key",
    "incorrect api key",
    "api key",
    "401",
    "403",
    "quota",
    "insufficient permissions",
    "insufficient_quota",
    "account deactivated",
    "billing",
];

/// Errors that look critical by substring but are actually per-request,
/// not per-credential — excluded from the critical classification.
const EXCLUDED_PATTERNS: &[&str] = &["unsupported model", "invalid model", "moderation", "content policy", "unsupported region", "user location", "geo"];

fn matches_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Classify raw error text into an [`ErrorKind`] (spec §4.11).
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if matches_any(&lower, AUTH_PATTERNS) {
        ErrorKind::AuthError
    } else if matches_any(&lower, RATE_LIMIT_PATTERNS) {
        ErrorKind::RateLimit
    } else if matches_any(&lower, TIMEOUT_PATTERNS) {
        ErrorKind::Timeout
    } else if matches_any(&lower, SERVER_ERROR_PATTERNS) {
        ErrorKind::ServerError
    } else if matches_any(&lower, NETWORK_PATTERNS) {
        ErrorKind::Network
    } else {
        ErrorKind::Other
    }
}

/// Whether this error should trip the sub-provider's circuit breaker
/// (spec §4.11): matches a critical pattern and does not match an
/// excluded pattern.
pub fn is_critical(message: &str) -> bool {
    let lower = message.to_lowercase();
    matches_any(&lower, CRITICAL_PATTERNS) && !matches_any(&lower, EXCLUDED_PATTERNS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_patterns_classify_as_auth_error() {
        assert_eq!(classify("Incorrect API key provided"), ErrorKind::AuthError);
        assert_eq!(classify("401 Unauthorized"), ErrorKind::AuthError);
    }

    #[test]
    fn rate_limit_patterns_classify_as_rate_limit() {
        assert_eq!(classify("Rate limit exceeded, please slow down"), ErrorKind::RateLimit);
        assert_eq!(classify("429 too many requests"), ErrorKind::RateLimit);
    }

    #[test]
    fn five_xx_classifies_as_server_error() {
        assert_eq!(classify("502 Bad Gateway"), ErrorKind::ServerError);
    }

    #[test]
    fn unmatched_text_classifies_as_other() {
        assert_eq!(classify("something weird happened"), ErrorKind::Other);
    }

    #[test]
    fn auth_errors_are_critical() {
        assert!(is_critical("Incorrect API key provided"));
        assert!(is_critical("insufficient_quota"));
    }

    #[test]
    fn excluded_patterns_are_not_critical_even_if_they_mention_api_key() {
        assert!(!is_critical("unsupported model argument for this api key tier"));
    }

    #[test]
    fn ordinary_server_errors_are_not_critical() {
        assert!(!is_critical("502 Bad Gateway"));
    }
}
