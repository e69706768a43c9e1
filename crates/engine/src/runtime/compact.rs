//! Turn compaction — collapses a completed turn's messages into the resume
//! summary the next turn inherits.
//!
//! A [`ResumeStrategy`] is a pure function of the message history; the
//! [`CompactionPolicy`] picks which one applies for the configured
//! [`ContextZipMode`].  The heavy `crazy_zip` path delegates to an external
//! [`Summarizer`] and falls back to a deterministic transcript digest when
//! none is configured.

use std::sync::Arc;

use async_trait::async_trait;

use tk_domain::config::{CompactionConfig, ContextZipMode};
use tk_domain::error::{Error, Result};
use tk_domain::message::AgentMessage;

/// Per-message cap applied while building a digest.
const DIGEST_LINE_MAX_CHARS: usize = 2000;
const DIGEST_LINE_HEAD_CHARS: usize = 1000;
const DIGEST_LINE_TAIL_CHARS: usize = 500;
const OMITTED_MARKER: &str = "[earlier messages omitted]\n";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resume strategies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps an ordered message history to a resume string.
///
/// Implementations hold no mutable state: the same history always compacts
/// to the same text, and an empty history yields `""`.
pub trait ResumeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate_resume(&self, messages: &[AgentMessage]) -> String;
}

/// Keeps only the payload of the most recent message.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastMessageResume;

impl ResumeStrategy for LastMessageResume {
    fn name(&self) -> &'static str {
        "last_message"
    }

    fn generate_resume(&self, messages: &[AgentMessage]) -> String {
        // `max_by_key` returns the last of equal keys, matching display order.
        messages
            .iter()
            .max_by_key(|m| (m.started_at, m.seq))
            .map(|m| m.payload.clone())
            .unwrap_or_default()
    }
}

/// Role-labelled transcript, oldest dropped first once `max_chars` is hit.
#[derive(Debug, Clone, Copy)]
pub struct TranscriptDigest {
    pub max_chars: usize,
}

impl TranscriptDigest {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl ResumeStrategy for TranscriptDigest {
    fn name(&self) -> &'static str {
        "transcript_digest"
    }

    fn generate_resume(&self, messages: &[AgentMessage]) -> String {
        if messages.is_empty() {
            return String::new();
        }

        let lines: Vec<String> = messages.iter().map(digest_line).collect();

        // Walk backwards so the most recent context survives the cap.
        let mut kept = Vec::new();
        let mut used = 0usize;
        for line in lines.iter().rev() {
            let len = line.chars().count();
            if used + len > self.max_chars {
                break;
            }
            used += len;
            kept.push(line.as_str());
        }

        let mut buf = String::new();
        if kept.len() < lines.len() {
            buf.push_str(OMITTED_MARKER);
        }
        for line in kept.into_iter().rev() {
            buf.push_str(line);
        }
        buf
    }
}

fn digest_line(message: &AgentMessage) -> String {
    let mut line = String::new();
    line.push_str(message.kind.label());
    line.push_str(": ");
    let char_count = message.payload.chars().count();
    if char_count > DIGEST_LINE_MAX_CHARS {
        // Long tool output: keep head and tail.
        line.extend(message.payload.chars().take(DIGEST_LINE_HEAD_CHARS));
        line.push_str(" [...] ");
        line.extend(
            message
                .payload
                .chars()
                .skip(char_count - DIGEST_LINE_TAIL_CHARS),
        );
    } else {
        line.push_str(&message.payload);
    }
    line.push('\n');
    line
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarizer collaborator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// External semantic compressor (typically an LLM) used by `crazy_zip`.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Selects how a finished turn is compacted.
pub struct CompactionPolicy {
    mode: ContextZipMode,
    light: LastMessageResume,
    digest: TranscriptDigest,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl CompactionPolicy {
    pub fn new(config: &CompactionConfig) -> Self {
        Self {
            mode: config.mode,
            light: LastMessageResume,
            digest: TranscriptDigest::new(config.digest_max_chars),
            summarizer: None,
        }
    }

    /// Plug the semantic compressor used under `crazy_zip`.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn mode(&self) -> ContextZipMode {
        self.mode
    }

    pub fn has_summarizer(&self) -> bool {
        self.summarizer.is_some()
    }

    /// Produce the resume summary for a turn's ordered messages.
    ///
    /// `Ok(None)` under `disabled`.  A summarizer failure is returned as
    /// [`Error::Compaction`]; callers must not complete the turn without it.
    pub async fn compact(&self, messages: &[AgentMessage]) -> Result<Option<String>> {
        match self.mode {
            ContextZipMode::Disabled => Ok(None),
            ContextZipMode::Zip => Ok(Some(self.light.generate_resume(messages))),
            ContextZipMode::CrazyZip => {
                if messages.is_empty() {
                    return Ok(Some(String::new()));
                }
                let digest = self.digest.generate_resume(messages);
                match &self.summarizer {
                    Some(summarizer) => {
                        let summary = summarizer
                            .summarize(&digest)
                            .await
                            .map_err(|e| Error::Compaction(format!("summarizer failed: {e}")))?;
                        Ok(Some(summary))
                    }
                    None => {
                        tracing::debug!(
                            strategy = self.digest.name(),
                            "no summarizer configured, using transcript digest"
                        );
                        Ok(Some(digest))
                    }
                }
            }
        }
    }
}
