//! Context compression between attempts
//!
//! Folds old conversation turns into synthetic summary messages until the
//! history fits a size budget. Real system messages and the most recent
//! turns are never touched, so repeated compression converges on a floor of
//! pinned messages, summaries and the recency window.

use crate::config::EngineConfig;
use crate::context::token_counter::TokenCounter;
use crate::messages::{Message, MessageRole, SummaryDigest};
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

/// Words that never count as topics
const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "another", "been", "before", "being", "below",
    "between", "both", "cannot", "could", "does", "doing", "done", "down", "each", "else",
    "even", "every", "from", "further", "have", "having", "here", "into", "just", "know",
    "like", "make", "more", "most", "much", "must", "need", "only", "other", "over", "please",
    "really", "same", "should", "some", "such", "sure", "than", "thank", "thanks", "that",
    "their", "them", "then", "there", "these", "they", "thing", "things", "this", "those",
    "through", "under", "until", "very", "want", "were", "what", "when", "where", "which",
    "while", "will", "with", "would", "your", "yours", "okay", "going", "let's", "it's",
];

/// Output of one compression pass
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// Reduced history, original order preserved
    pub messages: Vec<Message>,
    /// Whether another pass could still fold something
    pub further_compression_possible: bool,
    /// Estimated size after compression
    pub estimated_size: usize,
    /// Estimated size of the input
    pub original_size: usize,
    /// Original messages folded into summaries during this pass
    pub folded: usize,
}

impl CompressionResult {
    /// Whether the pass changed the history
    pub fn changed(&self) -> bool {
        self.folded > 0
    }
}

/// Summarizing context compressor
#[derive(Debug, Clone)]
pub struct ContextCompressor {
    counter: TokenCounter,
    recency_window: usize,
    max_topics: usize,
    max_outcomes: usize,
}

impl ContextCompressor {
    /// Create a compressor that keeps the last `recency_window` turns verbatim
    pub fn new(recency_window: usize) -> Self {
        Self {
            counter: TokenCounter::new(),
            recency_window,
            max_topics: 6,
            max_outcomes: 4,
        }
    }

    /// Create a compressor from engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.recency_window)
    }

    /// Use a custom size estimator
    pub fn with_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Cap the number of topics and outcomes a summary keeps
    pub fn with_digest_limits(mut self, max_topics: usize, max_outcomes: usize) -> Self {
        self.max_topics = max_topics;
        self.max_outcomes = max_outcomes;
        self
    }

    /// Recency window size
    pub fn recency_window(&self) -> usize {
        self.recency_window
    }

    /// Estimated size of a history
    pub fn estimate(&self, messages: &[Message]) -> usize {
        self.counter.count_messages(messages).tokens
    }

    /// Compress a history toward `target_budget` estimated tokens
    pub fn compress(&self, messages: &[Message], target_budget: usize) -> CompressionResult {
        let original_size = self.estimate(messages);
        let mut current = messages.to_vec();
        let mut size = original_size;
        let mut folded = 0;

        while size > target_budget {
            let Some(run) = self.oldest_foldable_run(&current) else {
                break;
            };
            folded += self.fold(&mut current, run);
            size = self.estimate(&current);
        }

        if folded > 0 && size >= original_size {
            debug!(
                original_size,
                estimated_size = size,
                "Folding did not shrink history, keeping input"
            );
            return CompressionResult {
                messages: messages.to_vec(),
                further_compression_possible: false,
                estimated_size: original_size,
                original_size,
                folded: 0,
            };
        }

        let further_compression_possible = self.oldest_foldable_run(&current).is_some();

        debug!(
            original_size,
            estimated_size = size,
            target_budget,
            folded,
            further_compression_possible,
            "Compressed context"
        );

        CompressionResult {
            messages: current,
            further_compression_possible,
            estimated_size: size,
            original_size,
            folded,
        }
    }

    /// Index of the first message inside the recency window
    fn window_start(&self, messages: &[Message]) -> usize {
        if self.recency_window == 0 {
            return messages.len();
        }

        let turns: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_pinned() && !m.is_summary())
            .map(|(i, _)| i)
            .collect();

        if turns.len() <= self.recency_window {
            0
        } else {
            turns[turns.len() - self.recency_window]
        }
    }

    /// Oldest contiguous run of compressible messages worth folding
    ///
    /// A run made of a single summary is already at the floor.
    fn oldest_foldable_run(&self, messages: &[Message]) -> Option<Range<usize>> {
        let end = self.window_start(messages);
        let mut i = 0;

        while i < end {
            if messages[i].is_pinned() {
                i += 1;
                continue;
            }

            let start = i;
            while i < end && !messages[i].is_pinned() {
                i += 1;
            }

            let run = &messages[start..i];
            if run.len() > 1 || !run[0].is_summary() {
                return Some(start..i);
            }
        }

        None
    }

    /// Replace a run with one summary, returning how many original turns it absorbed
    fn fold(&self, messages: &mut Vec<Message>, run: Range<usize>) -> usize {
        let slice = &messages[run.clone()];
        let started_at = slice[0].created_at;

        let mut prior_folded = 0;
        let mut prior_topics = Vec::new();
        let mut prior_outcomes = Vec::new();
        let mut turns = Vec::new();

        for message in slice {
            match &message.summary {
                Some(digest) => {
                    prior_folded += digest.folded;
                    prior_topics.extend(digest.topics.iter().cloned());
                    prior_outcomes.extend(digest.outcomes.iter().cloned());
                }
                None => turns.push(message),
            }
        }

        let mut topics = extract_topics(&turns, self.max_topics);
        for topic in prior_topics {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics.truncate(self.max_topics);

        let mut outcomes = prior_outcomes;
        outcomes.extend(extract_outcomes(&turns));
        if outcomes.len() > self.max_outcomes {
            outcomes.drain(..outcomes.len() - self.max_outcomes);
        }

        let digest = SummaryDigest {
            folded: prior_folded + turns.len(),
            topics,
            outcomes,
        };
        let absorbed = turns.len();

        messages.splice(run, [Message::summary(digest).with_created_at(started_at)]);
        absorbed
    }
}

impl Default for ContextCompressor {
    fn default() -> Self {
        Self::new(EngineConfig::default().recency_window)
    }
}

/// Most frequent keywords in user and assistant turns, ties by first appearance
fn extract_topics(turns: &[&Message], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut position = 0;

    for message in turns {
        if !matches!(message.role, MessageRole::User | MessageRole::Assistant) {
            continue;
        }
        for word in message
            .content
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '\''))
        {
            let word = word.trim_matches('\'').to_lowercase();
            if word.chars().count() < 4
                || word.chars().all(|c| c.is_ascii_digit())
                || STOPWORDS.contains(&word.as_str())
            {
                continue;
            }
            let entry = counts.entry(word).or_insert((0, position));
            entry.0 += 1;
            position += 1;
        }
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(limit).map(|(w, _, _)| w).collect()
}

/// Net outcomes of a run: tool activity in order, then what the worker concluded
fn extract_outcomes(turns: &[&Message]) -> Vec<String> {
    let mut outcomes: Vec<String> = Vec::new();

    for message in turns {
        let Some(tool) = &message.tool else {
            continue;
        };
        let result = tool.result.as_deref().unwrap_or(&message.content);
        let outcome = if looks_failed(result) {
            format!("attempted {}, failed", tool.name)
        } else {
            format!("ran {}", tool.name)
        };
        if !outcomes.contains(&outcome) {
            outcomes.push(outcome);
        }
    }

    let conclusion = turns
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant && !m.content.trim().is_empty())
        .map(|m| first_sentence(&m.content, 80));
    if let Some(sentence) = conclusion {
        outcomes.push(format!("established {}", sentence));
    }

    outcomes
}

/// Markers that make a tool result count as a failure
const FAILURE_MARKERS: &[&str] = &[
    "error",
    "failed",
    "failure",
    "exception",
    "denied",
    "not found",
    "traceback",
];

fn looks_failed(result: &str) -> bool {
    let lower = result.to_lowercase();
    FAILURE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// First sentence of `text`, cut at `max_chars` on a char boundary
fn first_sentence(text: &str, max_chars: usize) -> String {
    let line = text.trim().lines().next().unwrap_or_default();
    let sentence = match line.find(". ") {
        Some(end) => &line[..end],
        None => line.trim_end_matches('.'),
    };

    if sentence.chars().count() <= max_chars {
        sentence.to_string()
    } else {
        let cut: String = sentence.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}
