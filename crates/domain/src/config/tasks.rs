use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task plan configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Task plan retry policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// How many times a FAILED phase may be sent back to TODO.  Zero
    /// disables retries entirely.  Clamped to `0..=10`.
    #[serde(default)]
    pub max_phase_retries: u32,
}

impl TaskConfig {
    pub fn clamped(&self) -> Self {
        Self {
            max_phase_retries: self.max_phase_retries.min(10),
        }
    }
}
