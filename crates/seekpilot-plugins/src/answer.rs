//! Decides when a streamed answer has finished rendering.
//!
//! The page script reports what it sees on each poll; the watcher tracks
//! when the visible content last changed. An answer is done when the page
//! says so or when the content has been unchanged for the stable threshold.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One poll of the answer-detection script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Detection {
    pub has_answer: bool,
    pub is_complete: bool,
    pub reason: String,
    pub content: String,
    pub content_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Verdict {
    Pending,
    Complete { reason: String, content: String },
    TimedOut,
}

#[derive(Debug)]
pub struct AnswerWatcher {
    timeout: Duration,
    stable_threshold: Duration,
    last_content: String,
    last_change: Duration,
    checks: u32,
}

impl AnswerWatcher {
    pub fn new(timeout: Duration, stable_threshold: Duration) -> Self {
        Self {
            timeout,
            stable_threshold,
            last_content: String::new(),
            last_change: Duration::ZERO,
            checks: 0,
        }
    }

    /// Fold in a poll taken `elapsed` after watching began. `None` means
    /// the poll itself failed.
    pub fn observe(&mut self, elapsed: Duration, detection: Option<&Detection>) -> Verdict {
        self.checks += 1;

        if let Some(d) = detection.filter(|d| d.has_answer) {
            if d.content != self.last_content {
                self.last_content = d.content.clone();
                self.last_change = elapsed;
            }
            if d.is_complete {
                return Verdict::Complete {
                    reason: d.reason.clone(),
                    content: d.content.clone(),
                };
            }
            if d.content_length > 0 && elapsed.saturating_sub(self.last_change) >= self.stable_threshold {
                return Verdict::Complete {
                    reason: "content_stable_timeout".into(),
                    content: d.content.clone(),
                };
            }
        }

        if elapsed >= self.timeout {
            Verdict::TimedOut
        } else {
            Verdict::Pending
        }
    }

    pub fn checks(&self) -> u32 {
        self.checks
    }

    pub fn last_content(&self) -> &str {
        &self.last_content
    }
}
