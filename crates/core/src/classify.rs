//! Classification of backend failure text.
//!
//! Policy-blocked failures (the provider refused to generate on
//! content-safety grounds) carry a different user contract from every
//! other failure: the user was not charged and should change the input,
//! rather than retry later. They must never be reported as generic.

use serde::Serialize;

/// Coarse category of a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Provider refused the content. Not charged; try a different input.
    PolicyBlocked,
    /// Likely to succeed if retried later (network, rate limit, overload).
    Transient,
    /// Anything else.
    Fatal,
}

/// Substrings (lowercase) that mark a provider content-policy refusal.
const POLICY_SIGNATURES: &[&str] = &[
    "content policy",
    "content_policy",
    "policy_violation",
    "policy violation",
    "safety system",
    "safety filter",
    "moderation",
    "flagged",
    "prohibited content",
    "blocked by",
];

/// Substrings (lowercase) that mark a transient failure.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "temporarily",
    "unavailable",
    "overloaded",
    "connection",
    "network",
    "502",
    "503",
    "504",
    "429",
];

/// Classify a backend-provided error message.
///
/// Policy signatures win over transient ones: a refusal that also
/// mentions a timeout is still a refusal.
pub fn classify_error(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if POLICY_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        FailureKind::PolicyBlocked
    } else if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        FailureKind::Transient
    } else {
        FailureKind::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_refusals_detected() {
        assert_eq!(
            classify_error("Request rejected by the provider's safety system"),
            FailureKind::PolicyBlocked
        );
        assert_eq!(
            classify_error("CONTENT_POLICY: image flagged"),
            FailureKind::PolicyBlocked
        );
        assert_eq!(
            classify_error("error code: policy_violation"),
            FailureKind::PolicyBlocked
        );
    }

    #[test]
    fn transient_failures_detected() {
        assert_eq!(classify_error("upstream timed out"), FailureKind::Transient);
        assert_eq!(classify_error("HTTP 503 Service Unavailable"), FailureKind::Transient);
        assert_eq!(classify_error("Rate limit exceeded"), FailureKind::Transient);
    }

    #[test]
    fn policy_wins_over_transient() {
        assert_eq!(
            classify_error("moderation service timed out and flagged the prompt"),
            FailureKind::PolicyBlocked
        );
    }

    #[test]
    fn everything_else_is_fatal() {
        assert_eq!(classify_error("model crashed"), FailureKind::Fatal);
        assert_eq!(classify_error(""), FailureKind::Fatal);
    }
}
