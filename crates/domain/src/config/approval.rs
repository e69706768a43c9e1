use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool approval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which tool calls must wait for a human decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Pre-authorized tools run immediately; everything else is gated.
    #[default]
    Auto,
    /// Every tool call is gated.
    RequireApproval,
    /// Nothing is gated.  High risk: tools run with no human in the loop.
    Disabled,
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::RequireApproval => "require_approval",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub mode: ApprovalMode,
    /// Seconds to wait for a decision before the call resolves to
    /// `timed_out`.
    #[serde(default = "d_300")]
    pub timeout_secs: u64,
    /// Tools that skip the gate under `auto`.
    #[serde(default)]
    pub pre_authorized_tools: Vec<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::default(),
            timeout_secs: d_300(),
            pre_authorized_tools: Vec::new(),
        }
    }
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether a call to `tool_name` has to wait for a decision.
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        match self.mode {
            ApprovalMode::Disabled => false,
            ApprovalMode::RequireApproval => true,
            ApprovalMode::Auto => !self.pre_authorized_tools.iter().any(|t| t == tool_name),
        }
    }
}

fn d_300() -> u64 {
    300
}
