//! Terminal command gateway.
//!
//! Commands are registered once at startup with a declared argument schema,
//! an optional required permission and a handler.  Requests then run the
//! pipeline in [`gateway`].

pub mod gateway;
pub mod history;
pub mod schema;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

pub use gateway::{CommandGateway, CommandRequest, CommandResponse};
pub use history::{CommandHistory, CommandStage, HistoryEntry};
pub use schema::{ArgKind, ArgSpec, ArgValue, ParsedArgs};

/// What a handler receives once the request has passed every check.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub user_id: String,
    pub command: String,
    pub args: ParsedArgs,
}

/// Performs the command's side effect.  An `Err` is a handler-level
/// failure and is reported as [`tk_domain::Error::CommandFailed`].
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        invocation: &CommandInvocation,
    ) -> std::result::Result<serde_json::Value, String>;
}

pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    pub options: Vec<ArgSpec>,
    pub required_permission: Option<String>,
    pub handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    pub fn new(name: &str, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            name: name.to_owned(),
            description: String::new(),
            args: Vec::new(),
            options: Vec::new(),
            required_permission: None,
            handler,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn option(mut self, spec: ArgSpec) -> Self {
        self.options.push(spec);
        self
    }

    pub fn permission(mut self, permission: &str) -> Self {
        self.required_permission = Some(permission.to_owned());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct CommandRegistryBuilder {
    commands: HashMap<String, Arc<CommandSpec>>,
}

impl CommandRegistryBuilder {
    pub fn register(mut self, spec: CommandSpec) -> Self {
        let name = spec.name.clone();
        if self.commands.insert(name.clone(), Arc::new(spec)).is_some() {
            tracing::warn!(command = %name, "command registered twice, keeping the last one");
        }
        self
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            commands: self.commands,
        }
    }
}

/// Read-only name → command mapping.
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandSpec>>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommandSpec>> {
        self.commands.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permissions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait PermissionChecker: Send + Sync {
    fn has_permission(&self, user_id: &str, permission: &str) -> bool;
}

/// Static user → permissions grants.  The `*` permission grants everything.
#[derive(Debug, Clone, Default)]
pub struct GrantSet {
    grants: HashMap<String, HashSet<String>>,
}

impl GrantSet {
    pub fn grant(mut self, user_id: &str, permission: &str) -> Self {
        self.grants
            .entry(user_id.to_owned())
            .or_default()
            .insert(permission.to_owned());
        self
    }
}

impl PermissionChecker for GrantSet {
    fn has_permission(&self, user_id: &str, permission: &str) -> bool {
        self.grants
            .get(user_id)
            .is_some_and(|p| p.contains(permission) || p.contains("*"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_set_checks_user_and_wildcard() {
        let grants = GrantSet::default()
            .grant("alice", "deploy")
            .grant("root", "*");
        assert!(grants.has_permission("alice", "deploy"));
        assert!(!grants.has_permission("alice", "shutdown"));
        assert!(grants.has_permission("root", "shutdown"));
        assert!(!grants.has_permission("mallory", "deploy"));
    }
}
