//! The five-stage command pipeline:
//!
//! 1. existence: the command must be registered
//! 2. permission: the user must hold the command's permission
//! 3. validation: raw tokens must satisfy the declared schema
//! 4. dispatch: the handler runs and returns a payload
//! 5. history: always recorded, whatever happened above
//!
//! Stages 1-3 short-circuit; the failure itself is still recorded.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use tk_domain::error::{Error, Result};
use tk_domain::trace::TraceEvent;

use super::history::{CommandHistory, CommandStage, HistoryEntry};
use super::schema::validate_args;
use super::{CommandInvocation, CommandRegistry, PermissionChecker};

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub user_id: String,
    pub command: String,
    /// Raw tokens after the command name.
    pub args: Vec<String>,
}

impl CommandRequest {
    /// Split a command line on whitespace: the first word is the command.
    pub fn parse(user_id: &str, line: &str) -> Self {
        let mut words = line.split_whitespace().map(str::to_owned);
        let command = words.next().unwrap_or_default();
        Self {
            user_id: user_id.to_owned(),
            command,
            args: words.collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub command: String,
    pub output: serde_json::Value,
}

pub struct CommandGateway {
    registry: Arc<CommandRegistry>,
    permissions: Arc<dyn PermissionChecker>,
    history: Arc<CommandHistory>,
}

impl CommandGateway {
    pub fn new(
        registry: Arc<CommandRegistry>,
        permissions: Arc<dyn PermissionChecker>,
        history: Arc<CommandHistory>,
    ) -> Self {
        Self {
            registry,
            permissions,
            history,
        }
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub async fn execute(&self, request: CommandRequest) -> Result<CommandResponse> {
        let started = Instant::now();
        let (stage, result) = self.run_stages(&request).await;
        self.record(&request, stage, &result, started);
        result
    }

    async fn run_stages(&self, request: &CommandRequest) -> (CommandStage, Result<CommandResponse>) {
        let name = request.command.trim();

        let Some(spec) = self.registry.get(name) else {
            return (
                CommandStage::Existence,
                Err(Error::UnknownCommand(name.to_owned())),
            );
        };

        if let Some(permission) = &spec.required_permission {
            if !self.permissions.has_permission(&request.user_id, permission) {
                return (
                    CommandStage::Permission,
                    Err(Error::PermissionDenied {
                        command: spec.name.clone(),
                        user_id: request.user_id.clone(),
                    }),
                );
            }
        }

        let args = match validate_args(&spec.args, &spec.options, &request.args) {
            Ok(args) => args,
            Err(failures) => {
                return (
                    CommandStage::Validation,
                    Err(Error::InvalidArguments {
                        command: spec.name.clone(),
                        failures,
                    }),
                );
            }
        };

        let invocation = CommandInvocation {
            user_id: request.user_id.clone(),
            command: spec.name.clone(),
            args,
        };
        match spec.handler.handle(&invocation).await {
            Ok(output) => (
                CommandStage::Completed,
                Ok(CommandResponse {
                    command: spec.name.clone(),
                    output,
                }),
            ),
            Err(message) => (
                CommandStage::Dispatch,
                Err(Error::CommandFailed {
                    command: spec.name.clone(),
                    message,
                }),
            ),
        }
    }

    fn record(
        &self,
        request: &CommandRequest,
        stage: CommandStage,
        result: &Result<CommandResponse>,
        started: Instant,
    ) {
        let succeeded = result.is_ok();
        let error = result.as_ref().err().map(|e| e.to_string());

        if let Some(e) = &error {
            tracing::warn!(
                command = %request.command,
                user_id = %request.user_id,
                %stage,
                error = %e,
                "command rejected"
            );
        }
        TraceEvent::CommandExecuted {
            command: request.command.clone(),
            user_id: request.user_id.clone(),
            stage: stage.to_string(),
            succeeded,
        }
        .emit();

        self.history.push(HistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            command: request.command.clone(),
            args: request.args.clone(),
            stage,
            succeeded,
            error,
            at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}
