use std::sync::Arc;

use tk_domain::config::Config;
use tk_store::Storage;

use crate::commands::CommandGateway;
use crate::runtime::approval::ToolApprovalGate;
use crate::runtime::context::ContextReplay;
use crate::runtime::dispatcher::StrategyRegistry;
use crate::runtime::turn::TurnManager;

/// Shared engine state handed to every orchestration entry point.
///
/// Everything here is either immutable after startup (config, registries)
/// or internally synchronized (store, gate, command history), so the state
/// is cheap to clone into concurrent tasks.
#[derive(Clone)]
pub struct EngineState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,

    // ── Turn orchestration ────────────────────────────────────────────
    pub strategies: Arc<StrategyRegistry>,
    pub turns: Arc<TurnManager>,
    pub replay: Arc<ContextReplay>,
    pub gate: Arc<dyn ToolApprovalGate>,

    // ── Terminal commands ─────────────────────────────────────────────
    pub commands: Arc<CommandGateway>,
}
