//! Error classification
//!
//! Maps every [`WorkerError`] onto one of eight [`ErrorKind`]s together with
//! a retry decision and, for waiting kinds, a suggested backoff. Typed
//! signals (HTTP status, error variant) win over message text; message text
//! is matched against per-kind pattern sets in a fixed priority order.

use crate::config::BackoffConfig;
use crate::execution::WorkerError;
use regex::{Regex, RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Classification of worker failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Transient worker or tool failure; retry immediately
    Recoverable,
    /// History too large for the worker; compress before retrying
    ContextOverflow,
    /// Throttled; wait before retrying
    RateLimit,
    /// Connectivity problem; retry with exponential backoff
    NetworkError,
    /// Request took too long; retry with exponential backoff
    Timeout,
    /// Quota or billing limit; retrying won't help
    UsageLimit,
    /// Credentials rejected; retrying won't help
    AuthError,
    /// Anything else that can't be recovered
    Fatal,
}

impl ErrorKind {
    /// All kinds, in no particular order
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Recoverable,
        ErrorKind::ContextOverflow,
        ErrorKind::RateLimit,
        ErrorKind::NetworkError,
        ErrorKind::Timeout,
        ErrorKind::UsageLimit,
        ErrorKind::AuthError,
        ErrorKind::Fatal,
    ];

    /// Whether failures of this kind are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Recoverable
                | ErrorKind::ContextOverflow
                | ErrorKind::RateLimit
                | ErrorKind::NetworkError
                | ErrorKind::Timeout
        )
    }

    /// Stable identifier used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Recoverable => "RECOVERABLE",
            ErrorKind::ContextOverflow => "CONTEXT_OVERFLOW",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::UsageLimit => "USAGE_LIMIT",
            ErrorKind::AuthError => "AUTH_ERROR",
            ErrorKind::Fatal => "FATAL",
        }
    }

    /// Plain-language name shown to users
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Recoverable => "temporary error",
            ErrorKind::ContextOverflow => "conversation too long",
            ErrorKind::RateLimit => "rate limit",
            ErrorKind::NetworkError => "network error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UsageLimit => "usage limit",
            ErrorKind::AuthError => "authentication error",
            ErrorKind::Fatal => "unrecoverable error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A worker failure with its classification
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    kind: ErrorKind,
    retryable: bool,
    backoff: Option<Duration>,
    detail: String,
    raw: Arc<WorkerError>,
}

impl ClassifiedError {
    /// Error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether another attempt may succeed
    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// Suggested wait before the next attempt
    pub fn backoff(&self) -> Option<Duration> {
        self.backoff
    }

    /// Human-readable cause
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Underlying worker error
    pub fn raw(&self) -> &WorkerError {
        &self.raw
    }

    /// Whether the run was stopped from outside rather than by the worker
    pub fn is_interruption(&self) -> bool {
        matches!(
            self.raw.as_ref(),
            WorkerError::Cancelled | WorkerError::DeadlineExceeded
        )
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

// Message patterns per kind, checked in this order.
const CONTEXT_OVERFLOW_PATTERNS: &[&str] = &[
    r"context.*too.*long",
    r"context.*length.*exceed",
    r"token.*limit.*exceed",
    r"max.*context.*length",
    r"context.*window.*exceeded",
    r"conversation.*too.*long",
    r"message.*too.*long",
    r"prompt.*too.*long",
    r"input.*length.*exceed",
    r"exceeds.*maximum.*tokens",
    r"output.*tokens.*exceed",
    r"completion.*too.*long",
    r"response.*length.*exceed",
];

const USAGE_LIMIT_PATTERNS: &[&str] = &[
    r"usage.*limit.*exceed",
    r"quota.*exceed",
    r"insufficient.*quota",
    r"billing.*limit",
    r"credit.*limit",
    r"account.*limit",
    r"monthly.*limit",
    r"daily.*limit",
    r"subscription.*limit",
    r"plan.*limit",
    r"free.*tier.*limit",
];

const AUTH_ERROR_PATTERNS: &[&str] = &[
    r"invalid.*api.*key",
    r"authentication.*fail",
    r"unauthorized",
    r"\b401\b",
    r"\b403\b",
    r"permission.*denied",
    r"access.*denied",
    r"invalid.*credential",
    r"token.*expired",
    r"token.*invalid",
    r"bearer.*invalid",
    r"api.*key.*invalid",
    r"api.*key.*not.*found",
];

const NETWORK_ERROR_PATTERNS: &[&str] = &[
    r"connection.*refused",
    r"connection.*reset",
    r"connection.*timeout",
    r"network.*unreachable",
    r"no.*such.*host",
    r"failed.*to.*resolve",
    r"connection.*error",
    r"socket.*error",
    r"ssl.*error",
    r"certificate.*error",
    r"tls.*error",
    r"service.*unavailable",
    r"bad.*gateway",
    r"gateway.*timeout",
    r"\b50[234]\b",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    r"timeout.*exceeded",
    r"request.*timeout",
    r"read.*timeout",
    r"write.*timeout",
    r"connect.*timeout",
    r"operation.*timed.*out",
    r"timed.*out",
    r"deadline.*exceeded",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    r"rate.*limit",
    r"too.*many.*request",
    r"request.*throttl",
    r"slow.*down",
    r"retry.*after",
    r"\b429\b",
    r"rate.*exceeded",
    r"requests.*per.*minute",
    r"requests.*per.*second",
    r"api.*limit",
    r"overloaded",
];

const FATAL_PATTERNS: &[&str] = &[
    r"model.*not.*found",
    r"model.*unavailable",
    r"internal.*server.*error",
    r"\b500\b",
    r"service.*discovery.*failed",
];

/// Pattern-based error classifier
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    backoff: BackoffConfig,
    patterns: Vec<(ErrorKind, RegexSet)>,
    wait_hints: Vec<(Regex, u64)>,
}

impl ErrorClassifier {
    /// Create a classifier using the given backoff policy
    pub fn new(backoff: BackoffConfig) -> Self {
        let patterns = [
            (ErrorKind::ContextOverflow, CONTEXT_OVERFLOW_PATTERNS),
            (ErrorKind::UsageLimit, USAGE_LIMIT_PATTERNS),
            (ErrorKind::AuthError, AUTH_ERROR_PATTERNS),
            (ErrorKind::NetworkError, NETWORK_ERROR_PATTERNS),
            (ErrorKind::Timeout, TIMEOUT_PATTERNS),
            (ErrorKind::RateLimit, RATE_LIMIT_PATTERNS),
            (ErrorKind::Fatal, FATAL_PATTERNS),
        ]
        .into_iter()
        .map(|(kind, set)| (kind, build_set(kind, set)))
        .collect();

        // Seconds first, so "30s (0.5 minutes)" reads as 30 seconds
        let wait_hints = [
            (r"(?i)(\d+)\s*(?:seconds?|secs?|s)\b", 1),
            (r"(?i)(\d+)\s*(?:minutes?|mins?|m)\b", 60),
            (r"(?i)(\d+)\s*(?:hours?|hrs?|h)\b", 3_600),
        ]
        .into_iter()
        .filter_map(|(pattern, multiplier)| Regex::new(pattern).ok().map(|re| (re, multiplier)))
        .collect();

        Self {
            backoff,
            patterns,
            wait_hints,
        }
    }

    /// Backoff policy in use
    pub fn backoff_config(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Classify a failure from the first attempt
    pub fn classify(&self, error: impl Into<Arc<WorkerError>>) -> ClassifiedError {
        self.classify_at(error, 0)
    }

    /// Classify a failure; `attempt` scales exponential backoff
    pub fn classify_at(&self, error: impl Into<Arc<WorkerError>>, attempt: u32) -> ClassifiedError {
        let raw: Arc<WorkerError> = error.into();
        let (kind, hint) = self.kind_of(&raw);

        let retryable = match raw.as_ref() {
            WorkerError::DeadlineExceeded => false,
            _ => kind.is_retryable(),
        };

        let backoff = if !retryable {
            None
        } else {
            match kind {
                ErrorKind::RateLimit => Some(
                    hint.map(|wait| self.backoff.clamp_wait(wait))
                        .unwrap_or_else(|| self.backoff.rate_limit_default()),
                ),
                ErrorKind::NetworkError | ErrorKind::Timeout => {
                    Some(self.backoff.exponential_delay(attempt))
                }
                _ => None,
            }
        };

        let classified = ClassifiedError {
            kind,
            retryable,
            backoff,
            detail: raw.to_string(),
            raw,
        };

        debug!(
            kind = %classified.kind,
            retryable = classified.retryable,
            backoff_ms = classified.backoff.map(|d| d.as_millis() as u64),
            attempt,
            "Classified worker error"
        );

        classified
    }

    /// Kind of an error plus any wait the error itself asked for
    fn kind_of(&self, error: &WorkerError) -> (ErrorKind, Option<Duration>) {
        match error {
            WorkerError::Http {
                status,
                message,
                retry_after,
            } => {
                let kind = match status {
                    429 => Some(ErrorKind::RateLimit),
                    401 | 403 => Some(ErrorKind::AuthError),
                    402 => Some(ErrorKind::UsageLimit),
                    408 => Some(ErrorKind::Timeout),
                    413 => Some(ErrorKind::ContextOverflow),
                    502..=504 => Some(ErrorKind::NetworkError),
                    500..=599 => Some(ErrorKind::Fatal),
                    _ => None,
                };
                let kind = kind.unwrap_or_else(|| self.match_message(message));
                let hint = match kind {
                    ErrorKind::RateLimit => retry_after.or_else(|| self.extract_wait(message)),
                    _ => None,
                };
                (kind, hint)
            }
            WorkerError::Timeout(_) | WorkerError::DeadlineExceeded => (ErrorKind::Timeout, None),
            WorkerError::Connection(_) => (ErrorKind::NetworkError, None),
            WorkerError::ContextLength(_) => (ErrorKind::ContextOverflow, None),
            WorkerError::Tool { .. } | WorkerError::Transient(_) => (ErrorKind::Recoverable, None),
            WorkerError::Cancelled => (ErrorKind::Fatal, None),
            WorkerError::Message(message) => self.message_kind(message),
            WorkerError::Other(err) => self.message_kind(&format!("{:#}", err)),
        }
    }

    fn message_kind(&self, message: &str) -> (ErrorKind, Option<Duration>) {
        let kind = self.match_message(message);
        let hint = match kind {
            ErrorKind::RateLimit => self.extract_wait(message),
            _ => None,
        };
        (kind, hint)
    }

    /// First kind whose patterns match; unmatched text is fatal
    fn match_message(&self, message: &str) -> ErrorKind {
        self.patterns
            .iter()
            .find(|(_, set)| set.is_match(message))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Fatal)
    }

    /// Parse "retry in 30 seconds" style hints
    fn extract_wait(&self, message: &str) -> Option<Duration> {
        self.wait_hints.iter().find_map(|(re, multiplier)| {
            let value: u64 = re.captures(message)?.get(1)?.as_str().parse().ok()?;
            Some(Duration::from_secs(value.saturating_mul(*multiplier)))
        })
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

fn build_set(kind: ErrorKind, patterns: &[&str]) -> RegexSet {
    match RegexSetBuilder::new(patterns).case_insensitive(true).build() {
        Ok(set) => set,
        Err(e) => {
            warn!(kind = %kind, error = %e, "Invalid classifier patterns, kind disabled");
            RegexSet::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error: WorkerError) -> ClassifiedError {
        ErrorClassifier::default().classify(error)
    }

    fn message(text: &str) -> ErrorKind {
        classify(WorkerError::Message(text.to_string())).kind()
    }

    fn http(status: u16, text: &str) -> WorkerError {
        WorkerError::Http {
            status,
            message: text.to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_context_overflow_patterns() {
        assert_eq!(message("This model's maximum context length is 8192 tokens"), ErrorKind::ContextOverflow);
        assert_eq!(message("prompt is too long: 210000 tokens"), ErrorKind::ContextOverflow);
        assert_eq!(message("Context window exceeded"), ErrorKind::ContextOverflow);
    }

    #[test]
    fn test_usage_and_auth_patterns() {
        assert_eq!(message("Quota exceeded for this project"), ErrorKind::UsageLimit);
        assert_eq!(message("insufficient_quota"), ErrorKind::UsageLimit);
        assert_eq!(message("Invalid API key provided"), ErrorKind::AuthError);
        assert_eq!(message("Error 401"), ErrorKind::AuthError);
        assert_eq!(message("Permission denied"), ErrorKind::AuthError);
    }

    #[test]
    fn test_network_and_timeout_patterns() {
        assert_eq!(message("Connection refused"), ErrorKind::NetworkError);
        assert_eq!(message("503 Service Unavailable"), ErrorKind::NetworkError);
        assert_eq!(message("Read timeout"), ErrorKind::Timeout);
        assert_eq!(message("operation timed out"), ErrorKind::Timeout);
    }

    #[test]
    fn test_priority_order() {
        // Overflow outranks rate limiting
        assert_eq!(message("rate limit: prompt too long"), ErrorKind::ContextOverflow);
        // Usage limit outranks rate limiting
        assert_eq!(message("rate limit: monthly limit reached, quota exceeded"), ErrorKind::UsageLimit);
    }

    #[test]
    fn test_unmatched_is_fatal() {
        let classified = classify(WorkerError::Message("something odd happened".to_string()));
        assert_eq!(classified.kind(), ErrorKind::Fatal);
        assert!(!classified.retryable());
        assert!(classified.backoff().is_none());

        assert_eq!(message(""), ErrorKind::Fatal);
        assert_eq!(message("model not found"), ErrorKind::Fatal);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(classify(http(429, "")).kind(), ErrorKind::RateLimit);
        assert_eq!(classify(http(401, "")).kind(), ErrorKind::AuthError);
        assert_eq!(classify(http(403, "")).kind(), ErrorKind::AuthError);
        assert_eq!(classify(http(402, "")).kind(), ErrorKind::UsageLimit);
        assert_eq!(classify(http(408, "")).kind(), ErrorKind::Timeout);
        assert_eq!(classify(http(413, "")).kind(), ErrorKind::ContextOverflow);
        assert_eq!(classify(http(502, "")).kind(), ErrorKind::NetworkError);
        assert_eq!(classify(http(504, "")).kind(), ErrorKind::NetworkError);
        assert_eq!(classify(http(500, "")).kind(), ErrorKind::Fatal);
        assert_eq!(classify(http(599, "")).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_other_status_falls_through_to_message() {
        assert_eq!(
            classify(http(400, "prompt is too long")).kind(),
            ErrorKind::ContextOverflow
        );
        assert_eq!(classify(http(404, "nope")).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_typed_variants() {
        assert_eq!(
            classify(WorkerError::Timeout(Duration::from_secs(30))).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(WorkerError::Connection("reset".into())).kind(),
            ErrorKind::NetworkError
        );
        assert_eq!(
            classify(WorkerError::ContextLength("too big".into())).kind(),
            ErrorKind::ContextOverflow
        );
        assert_eq!(
            classify(WorkerError::Tool {
                tool: "shell".into(),
                message: "exit 1".into()
            })
            .kind(),
            ErrorKind::Recoverable
        );
        assert_eq!(
            classify(WorkerError::Transient("flaky".into())).kind(),
            ErrorKind::Recoverable
        );

        let cancelled = classify(WorkerError::Cancelled);
        assert_eq!(cancelled.kind(), ErrorKind::Fatal);
        assert!(!cancelled.retryable());

        assert!(cancelled.is_interruption());

        let deadline = classify(WorkerError::DeadlineExceeded);
        assert!(deadline.is_interruption());
        assert!(!classify(WorkerError::Timeout(Duration::from_secs(1))).is_interruption());
        assert_eq!(deadline.kind(), ErrorKind::Timeout);
        assert!(!deadline.retryable());
        assert!(deadline.backoff().is_none());
    }

    #[test]
    fn test_anyhow_errors_use_message_patterns() {
        let err = anyhow::anyhow!("upstream said: rate limit, retry after 12 seconds");
        let classified = classify(WorkerError::Other(err));

        assert_eq!(classified.kind(), ErrorKind::RateLimit);
        assert_eq!(classified.backoff(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_rate_limit_waits() {
        let typed = classify(WorkerError::Http {
            status: 429,
            message: "slow down, try again in 3 minutes".into(),
            retry_after: Some(Duration::from_secs(7)),
        });
        assert_eq!(typed.backoff(), Some(Duration::from_secs(7)));

        let parsed = classify(http(429, "try again in 2 minutes"));
        // 120s clamped to the 60s ceiling
        assert_eq!(parsed.backoff(), Some(Duration::from_secs(60)));

        let seconds = classify(WorkerError::Message("Rate limit hit, retry in 30s".into()));
        assert_eq!(seconds.backoff(), Some(Duration::from_secs(30)));

        let default = classify(WorkerError::Message("Too many requests".into()));
        assert_eq!(default.backoff(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_exponential_backoff_uses_attempt() {
        let classifier = ErrorClassifier::new(BackoffConfig::default().with_base(1_000));

        let first = classifier.classify_at(WorkerError::Connection("reset".into()), 0);
        let third = classifier.classify_at(WorkerError::Connection("reset".into()), 2);

        assert_eq!(first.backoff(), Some(Duration::from_millis(1_000)));
        assert_eq!(third.backoff(), Some(Duration::from_millis(4_000)));
    }

    #[test]
    fn test_non_retryable_kinds_have_no_backoff() {
        for error in [http(401, ""), http(402, ""), http(500, "")] {
            let classified = classify(error);
            assert!(!classified.retryable());
            assert!(classified.backoff().is_none());
        }
    }

    #[test]
    fn test_detail_and_raw() {
        let classified = classify(WorkerError::Connection("dns lookup failed".into()));
        assert!(classified.detail().contains("dns lookup failed"));
        assert!(matches!(classified.raw(), WorkerError::Connection(_)));
        assert_eq!(classified.to_string(), format!("NETWORK_ERROR: {}", classified.detail()));
    }

    #[test]
    fn test_kind_metadata() {
        for kind in ErrorKind::ALL {
            assert!(!kind.label().is_empty());
            assert!(!kind.name().is_empty());
        }
        assert_eq!(
            serde_json::to_string(&ErrorKind::ContextOverflow).unwrap(),
            "\"CONTEXT_OVERFLOW\""
        );
    }
}
