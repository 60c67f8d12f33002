//! Fallback answers
//!
//! When a task cannot be completed, the user still gets a readable answer:
//! what went wrong in plain language, what the worker managed to do, and
//! what to try next. Raw errors are cut to their first line and scrubbed of
//! credentials before they are shown.

use crate::execution::{AttemptState, WorkerError};
use crate::messages::MessageRole;
use crate::recovery::classifier::{ClassifiedError, ErrorKind};
use regex::Regex;
use std::sync::OnceLock;

/// Per-kind wording of a fallback
struct Template {
    title: &'static str,
    details: &'static str,
    suggestion: &'static str,
}

fn template(error: Option<&ClassifiedError>) -> Template {
    match error.map(ClassifiedError::raw) {
        Some(WorkerError::Cancelled) => {
            return Template {
                title: "Task cancelled",
                details: "The task was cancelled before it could finish.",
                suggestion: "Run the task again when you are ready.",
            }
        }
        Some(WorkerError::DeadlineExceeded) => {
            return Template {
                title: "Deadline reached",
                details: "The task ran out of time before it could finish.",
                suggestion: "Allow more time or split the task into smaller steps.",
            }
        }
        _ => {}
    }

    match error.map(ClassifiedError::kind) {
        Some(ErrorKind::UsageLimit) => Template {
            title: "Usage limit exceeded",
            details: "The API usage limit has been reached. The quota or credits may be exhausted.",
            suggestion: "Try again later or reduce the scope of the task.",
        },
        Some(ErrorKind::AuthError) => Template {
            title: "Authentication failed",
            details: "The worker could not authenticate. The API key may be invalid or expired.",
            suggestion: "Check the API key or contact your administrator.",
        },
        Some(ErrorKind::RateLimit) => Template {
            title: "Rate limit reached",
            details: "Too many requests were sent in a short time and the service is throttling them.",
            suggestion: "Wait a moment and try again.",
        },
        Some(ErrorKind::ContextOverflow) => Template {
            title: "Conversation too long",
            details: "The conversation grew too large for the model, even after it was compressed.",
            suggestion: "Start a new session or split the task into smaller steps.",
        },
        Some(ErrorKind::NetworkError) => Template {
            title: "Network error",
            details: "The service could not be reached.",
            suggestion: "Check your network connection and try again.",
        },
        Some(ErrorKind::Timeout) => Template {
            title: "Request timed out",
            details: "The request was not processed in time. The service may be overloaded.",
            suggestion: "Simplify the task or run it again.",
        },
        Some(ErrorKind::Fatal) => Template {
            title: "Unrecoverable error",
            details: "An unexpected error occurred that retrying cannot fix.",
            suggestion: "Contact your administrator if this keeps happening.",
        },
        Some(ErrorKind::Recoverable) | None => Template {
            title: "Task could not be completed",
            details: "An error occurred that could not be resolved by retrying.",
            suggestion: "Simplify the task or start over.",
        },
    }
}

/// Builds best-effort answers from partial progress
#[derive(Debug, Clone)]
pub struct FallbackGenerator {
    max_tools: usize,
    max_detail_chars: usize,
    max_progress_chars: usize,
}

impl FallbackGenerator {
    /// Create a generator with default limits
    pub fn new() -> Self {
        Self {
            max_tools: 5,
            max_detail_chars: 200,
            max_progress_chars: 300,
        }
    }

    /// Limit how many tools are listed
    pub fn with_max_tools(mut self, max_tools: usize) -> Self {
        self.max_tools = max_tools;
        self
    }

    /// Limit the length of the quoted cause
    pub fn with_max_detail_chars(mut self, chars: usize) -> Self {
        self.max_detail_chars = chars;
        self
    }

    /// Generate the fallback answer
    ///
    /// Never empty, whatever the state.
    pub fn generate(&self, state: &AttemptState, error: Option<&ClassifiedError>) -> String {
        let template = template(error);
        let mut parts = vec![template.title.to_string(), String::new()];

        if state.is_empty() {
            parts.push("I was unable to start working on this task.".to_string());
            parts.push(String::new());
        }

        let tools = state.tools_used();
        if !tools.is_empty() {
            let shown: Vec<&str> = tools.iter().take(self.max_tools).map(String::as_str).collect();
            let mut line = format!("**Actions taken:** {}", shown.join(", "));
            if tools.len() > shown.len() {
                line.push_str(&format!(" and {} more", tools.len() - shown.len()));
            }
            parts.push(line);
            parts.push(String::new());
        }

        let progress = state
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && !m.is_summary() && !m.content.trim().is_empty());
        if let Some(message) = progress {
            parts.push(format!(
                "**Progress so far:** {}",
                truncate(&redact(message.content.trim()), self.max_progress_chars)
            ));
            parts.push(String::new());
        }

        if let Some(error) = error {
            let cause = first_line(error.detail());
            if !cause.is_empty() {
                parts.push(format!(
                    "**Stopped because:** {}",
                    truncate(&redact(cause), self.max_detail_chars)
                ));
                parts.push(String::new());
            }

            let earlier = state
                .last_error()
                .filter(|e| error.is_interruption() && !e.is_interruption());
            if let Some(earlier) = earlier {
                parts.push(format!(
                    "**Last error:** {} ({})",
                    truncate(&redact(first_line(earlier.detail())), self.max_detail_chars),
                    earlier.kind().label()
                ));
                parts.push(String::new());
            }
        }

        parts.push(format!("**Details:** {}", template.details));
        parts.push(String::new());

        if state.invocations() > 1 {
            parts.push(format!("**Attempts:** {}", state.invocations()));
            parts.push(String::new());
        }

        parts.push(format!("**Suggestion:** {}", template.suggestion));
        parts.join("\n")
    }

    /// Instruction sent on a retry, annotated with why the last attempt failed
    ///
    /// `attempt` is the 0-based index of the attempt that failed.
    pub fn retry_instruction(
        &self,
        instruction: &str,
        error: &ClassifiedError,
        attempt: u32,
        max_attempts: u32,
    ) -> String {
        let hint = match error.kind() {
            ErrorKind::ContextOverflow => {
                "the context was too large and has been compressed, keep answers concise"
            }
            ErrorKind::RateLimit => "the service was rate limited, the retry was delayed",
            ErrorKind::NetworkError | ErrorKind::Timeout => {
                "a temporary network error or timeout occurred, try again"
            }
            _ => "fix the problem and complete the task",
        };

        format!(
            "{}\n\n[Attempt {}/{} failed. Error type: {}. Cause: {}. Hint: {}.]",
            instruction,
            attempt.saturating_add(1),
            max_attempts,
            error.kind(),
            truncate(&redact(first_line(error.detail())), self.max_detail_chars),
            hint
        )
    }
}

impl Default for FallbackGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn first_line(text: &str) -> &str {
    text.trim().lines().next().unwrap_or_default().trim()
}

/// Cut to `max` chars on a char boundary
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

fn redaction_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"sk-[A-Za-z0-9_\-]{8,}", "[redacted]"),
            (r"(?i)\bbearer\s+[A-Za-z0-9._~+/\-]+=*", "Bearer [redacted]"),
            (
                r"(?i)\b(api[_-]?key|access[_-]?token|token|secret|password)(\s*[=:]\s*)[^\s,;&]+",
                "${1}${2}[redacted]",
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Replace anything that looks like a credential
pub(crate) fn redact(text: &str) -> String {
    redaction_rules()
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}
