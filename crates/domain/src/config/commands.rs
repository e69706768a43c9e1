use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Maximum number of history entries kept in memory (oldest evicted).
    #[serde(default = "d_1000")]
    pub history_limit: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            history_limit: d_1000(),
        }
    }
}

fn d_1000() -> usize {
    1000
}
