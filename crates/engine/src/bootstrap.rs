//! [`EngineState`] construction shared by the CLI commands and tests.

use std::sync::Arc;

use tk_domain::config::{ApprovalMode, Config, ConfigSeverity, ContextZipMode};
use tk_store::{MemoryStore, Storage};

use crate::commands::{
    CommandGateway, CommandHistory, CommandRegistry, CommandRegistryBuilder, CommandSpec, GrantSet,
    PermissionChecker,
};
use crate::runtime::approval::{ApprovalGate, ApprovalNotifier, LogNotifier, NoopGate, ToolApprovalGate};
use crate::runtime::compact::{CompactionPolicy, Summarizer};
use crate::runtime::context::ContextReplay;
use crate::runtime::dispatcher::{AgentStrategy, StrategyRegistry, StrategyRegistryBuilder};
use crate::runtime::strategies::{EchoStrategy, PhasedStrategy, ScriptRunner};
use crate::runtime::turn::TurnManager;
use crate::state::EngineState;

/// Collects the startup-time collaborators, then wires them into an
/// [`EngineState`].  Registries are frozen by [`EngineBuilder::build`].
pub struct EngineBuilder {
    config: Config,
    storage: Option<Arc<dyn Storage>>,
    strategies: StrategyRegistryBuilder,
    commands: CommandRegistryBuilder,
    permissions: Arc<dyn PermissionChecker>,
    notifier: Arc<dyn ApprovalNotifier>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            storage: None,
            strategies: StrategyRegistry::builder(),
            commands: CommandRegistry::builder(),
            permissions: Arc::new(GrantSet::default()),
            notifier: Arc::new(LogNotifier),
            summarizer: None,
        }
    }

    /// Register the `echo` and `phased` strategies.
    pub fn with_builtin_strategies(mut self) -> Self {
        self.strategies = self
            .strategies
            .register(Arc::new(EchoStrategy))
            .register(Arc::new(PhasedStrategy::new(Arc::new(ScriptRunner))));
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn AgentStrategy>) -> Self {
        self.strategies = self.strategies.register(strategy);
        self
    }

    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands = self.commands.register(spec);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Validate config and wire every subsystem.
    pub fn build(self) -> anyhow::Result<EngineState> {
        let config = self.config;

        // ── Config validation ────────────────────────────────────────────
        let issues = config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
                ConfigSeverity::Error => tracing::error!("config: {issue}"),
            }
        }
        let errors = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .count();
        if errors > 0 {
            anyhow::bail!("config validation failed with {errors} error(s)");
        }

        // ── Storage ──────────────────────────────────────────────────────
        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None => {
                tracing::info!("no storage configured, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        // ── Compaction ───────────────────────────────────────────────────
        let mut policy = CompactionPolicy::new(&config.compaction);
        if let Some(summarizer) = self.summarizer {
            policy = policy.with_summarizer(summarizer);
        }
        if config.compaction.mode == ContextZipMode::CrazyZip && !policy.has_summarizer() {
            tracing::warn!(
                "compaction.mode is crazy_zip but no summarizer is configured; \
                 turns will be compacted to a transcript digest"
            );
        }
        tracing::info!(mode = %policy.mode(), "compaction policy ready");
        let turns = Arc::new(TurnManager::new(storage.clone(), Arc::new(policy)));
        let replay = Arc::new(ContextReplay::new(&config.compaction));

        // ── Approval gate ────────────────────────────────────────────────
        let gate: Arc<dyn ToolApprovalGate> = match config.approval.mode {
            ApprovalMode::Disabled => {
                tracing::warn!("tool approval is disabled: every tool call runs ungated");
                Arc::new(NoopGate)
            }
            mode => {
                tracing::info!(
                    %mode,
                    timeout_secs = config.approval.timeout_secs,
                    pre_authorized = config.approval.pre_authorized_tools.len(),
                    "tool approval gate ready"
                );
                Arc::new(ApprovalGate::new(config.approval.clone(), self.notifier))
            }
        };

        // ── Registries ───────────────────────────────────────────────────
        let strategies = Arc::new(self.strategies.build());
        if strategies.is_empty() {
            tracing::warn!("no agent strategies registered; every advance will fail");
        } else {
            tracing::info!(strategies = ?strategies.names(), "strategy registry frozen");
        }

        let registry = Arc::new(self.commands.build());
        tracing::info!(commands = registry.len(), "command registry frozen");
        let history = Arc::new(CommandHistory::new(config.commands.history_limit));
        let commands = Arc::new(CommandGateway::new(registry, self.permissions, history));

        Ok(EngineState {
            config: Arc::new(config),
            storage,
            strategies,
            turns,
            replay,
            gate,
            commands,
        })
    }
}
