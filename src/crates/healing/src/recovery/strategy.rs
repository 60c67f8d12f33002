//! Healing strategy selection
//!
//! The transition table of the retry loop: which action follows a classified
//! failure on a given attempt.

use crate::recovery::classifier::{ClassifiedError, ErrorKind};
use std::time::Duration;

/// What the runner does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealingAction {
    /// Dispatch again right away
    RetryNow,
    /// Wait, then dispatch again
    RetryAfter(Duration),
    /// Shrink the history, then dispatch again
    CompressThenRetry,
    /// Stop and answer with a fallback built from partial progress
    AbortWithFallback,
    /// Stop immediately; nothing retried could help
    AbortFatal,
}

impl HealingAction {
    /// Whether the action leads to another attempt
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            HealingAction::RetryNow | HealingAction::RetryAfter(_) | HealingAction::CompressThenRetry
        )
    }
}

/// Pick the action for a failure on `attempt` (0-based) out of `max_attempts`
///
/// Running out of attempts takes precedence over everything else, including
/// a context overflow that compression could otherwise fix.
pub fn select_action(error: &ClassifiedError, attempt: u32, max_attempts: u32) -> HealingAction {
    if attempt.saturating_add(1) >= max_attempts {
        return HealingAction::AbortWithFallback;
    }

    match error.kind() {
        ErrorKind::ContextOverflow => HealingAction::CompressThenRetry,
        ErrorKind::Recoverable => HealingAction::RetryNow,
        ErrorKind::RateLimit | ErrorKind::NetworkError | ErrorKind::Timeout
            if error.retryable() =>
        {
            match error.backoff() {
                Some(delay) if !delay.is_zero() => HealingAction::RetryAfter(delay),
                _ => HealingAction::RetryNow,
            }
        }
        ErrorKind::Fatal | ErrorKind::AuthError if attempt == 0 => HealingAction::AbortFatal,
        _ => HealingAction::AbortWithFallback,
    }
}
