use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How aggressively a completed turn is summarized into its resume text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextZipMode {
    /// No resume summary is produced.
    Disabled,
    /// Keep a single representative message (the most recent one).
    #[default]
    Zip,
    /// Semantically compress the turn through a summarizer.
    CrazyZip,
}

impl fmt::Display for ContextZipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Zip => "zip",
            Self::CrazyZip => "crazy_zip",
        };
        f.write_str(s)
    }
}

/// Compaction collapses each completed turn into a resume summary so the
/// next turn's context stays bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default)]
    pub mode: ContextZipMode,
    /// Under `disabled`, replay the previous turns' raw messages instead of
    /// starting the next turn with no inherited context.
    #[serde(default)]
    pub replay_raw_when_disabled: bool,
    /// Upper bound on the transcript digest used when `crazy_zip` has no
    /// summarizer configured.
    #[serde(default = "d_4000")]
    pub digest_max_chars: usize,
    /// Number of most recent completed turns replayed into a new turn.
    #[serde(default = "d_8")]
    pub replay_turns: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            mode: ContextZipMode::default(),
            replay_raw_when_disabled: false,
            digest_max_chars: d_4000(),
            replay_turns: d_8(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_4000() -> usize {
    4000
}
fn d_8() -> usize {
    8
}
