mod approval;
mod commands;
mod compaction;
mod observability;
mod tasks;

pub use approval::*;
pub use commands::*;
pub use compaction::*;
pub use observability::*;
pub use tasks::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.approval.timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "approval.timeout_secs".into(),
                message: "timeout must be greater than 0".into(),
            });
        }

        if self.approval.mode == ApprovalMode::Disabled {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "approval.mode".into(),
                message: "\"disabled\" runs every tool call without human approval".into(),
            });
        }

        if self.approval.mode != ApprovalMode::Auto && !self.approval.pre_authorized_tools.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "approval.pre_authorized_tools".into(),
                message: format!("ignored unless mode is \"auto\" (mode is \"{}\")", self.approval.mode),
            });
        }

        for (i, tool) in self.approval.pre_authorized_tools.iter().enumerate() {
            if tool.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("approval.pre_authorized_tools[{i}]"),
                    message: "tool name must not be empty".into(),
                });
            }
        }

        if self.compaction.digest_max_chars == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "compaction.digest_max_chars".into(),
                message: "digest_max_chars must be greater than 0".into(),
            });
        }

        if self.commands.history_limit == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "commands.history_limit".into(),
                message: "history_limit of 0 keeps only the most recent entry".into(),
            });
        }

        errors
    }
}
