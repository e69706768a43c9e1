//! Task plan (task mode) — the multi-phase plan a strategy executes inside
//! one turn.
//!
//! The plan records phase status and parallel eligibility only; running
//! phases concurrently is the strategy's job.  Each phase guards its own
//! status with a lock so two workers can never both move the same phase out
//! of TODO, while the phase list itself needs no lock.

use parking_lot::Mutex;

use tk_domain::error::{Error, Result};
use tk_domain::plan::{PhaseStatus, TaskPhaseSnapshot, TaskPlanSnapshot};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
struct PhaseState {
    status: PhaseStatus,
    attempts: u32,
}

/// One step of a plan.  `index` defines the execution order, independent of
/// where the phase sits in the list.
#[derive(Debug)]
pub struct TaskPhase {
    pub id: String,
    pub title: String,
    pub description: String,
    pub index: u32,
    pub is_parallel: bool,
    state: Mutex<PhaseState>,
}

impl TaskPhase {
    pub fn new(id: &str, title: &str, index: u32) -> Self {
        Self {
            id: id.to_owned(),
            title: title.to_owned(),
            description: String::new(),
            index,
            is_parallel: false,
            state: Mutex::new(PhaseState {
                status: PhaseStatus::Todo,
                attempts: 0,
            }),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    /// Mark the phase eligible to run alongside its parallel neighbours.
    pub fn parallel(mut self) -> Self {
        self.is_parallel = true;
        self
    }

    pub fn status(&self) -> PhaseStatus {
        self.state.lock().status
    }

    /// How many times the phase has entered RUNNING.
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// TODO → RUNNING.  Exactly one concurrent caller wins.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.transition(&mut state, PhaseStatus::Todo, PhaseStatus::Running)?;
        state.attempts += 1;
        Ok(())
    }

    /// RUNNING → DONE.
    pub fn complete(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.transition(&mut state, PhaseStatus::Running, PhaseStatus::Done)
    }

    /// RUNNING → FAILED.
    pub fn fail(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.transition(&mut state, PhaseStatus::Running, PhaseStatus::Failed)
    }

    /// FAILED → TODO, allowed while fewer than `max_retries` retries have
    /// been used.
    fn retry(&self, max_retries: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.status == PhaseStatus::Failed && state.attempts > max_retries {
            return Err(Error::InvalidPhaseTransition {
                phase_id: self.id.clone(),
                from: state.status.to_string(),
                to: format!("{} (retry limit {max_retries} reached)", PhaseStatus::Todo),
            });
        }
        self.transition(&mut state, PhaseStatus::Failed, PhaseStatus::Todo)
    }

    fn transition(&self, state: &mut PhaseState, from: PhaseStatus, to: PhaseStatus) -> Result<()> {
        if state.status != from {
            return Err(Error::InvalidPhaseTransition {
                phase_id: self.id.clone(),
                from: state.status.to_string(),
                to: to.to_string(),
            });
        }
        state.status = to;
        Ok(())
    }

    pub fn snapshot(&self) -> TaskPhaseSnapshot {
        let state = *self.state.lock();
        TaskPhaseSnapshot {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            index: self.index,
            is_parallel: self.is_parallel,
            status: state.status,
            attempts: state.attempts,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The task plan attached to one in-flight turn.
#[derive(Debug)]
pub struct TaskModeMeta {
    pub goal: String,
    current_task_id: Mutex<Option<String>>,
    phases: Vec<TaskPhase>,
    max_retries: u32,
}

impl TaskModeMeta {
    pub fn new(goal: &str, phases: Vec<TaskPhase>) -> Self {
        Self {
            goal: goal.to_owned(),
            current_task_id: Mutex::new(None),
            phases,
            max_retries: 0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Rebuild a plan from a stored snapshot.  The current pointer is taken
    /// as-is, even if it no longer names a phase.
    pub fn restore(snapshot: &TaskPlanSnapshot, max_retries: u32) -> Self {
        let phases = snapshot
            .phases
            .iter()
            .map(|p| TaskPhase {
                id: p.id.clone(),
                title: p.title.clone(),
                description: p.description.clone(),
                index: p.index,
                is_parallel: p.is_parallel,
                state: Mutex::new(PhaseState {
                    status: p.status,
                    attempts: p.attempts,
                }),
            })
            .collect();
        Self {
            goal: snapshot.goal.clone(),
            current_task_id: Mutex::new(snapshot.current_task_id.clone()),
            phases,
            max_retries,
        }
    }

    pub fn phases(&self) -> &[TaskPhase] {
        &self.phases
    }

    pub fn phase(&self, id: &str) -> Option<&TaskPhase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.current_task_id.lock().clone()
    }

    /// The phase the current pointer names.
    ///
    /// Absent when the pointer is unset or dangling; a dangling pointer is
    /// logged, never an error.
    pub fn current_phase(&self) -> Option<&TaskPhase> {
        let current = self.current_task_id.lock().clone()?;
        let found = self.phase(&current);
        if found.is_none() {
            tracing::warn!(
                current_task_id = %current,
                goal = %self.goal,
                "task plan pointer names no phase"
            );
        }
        found
    }

    /// Point the plan at `phase_id`.
    pub fn set_current(&self, phase_id: &str) -> Result<()> {
        if self.phase(phase_id).is_none() {
            return Err(Error::PhaseNotFound(phase_id.to_owned()));
        }
        *self.current_task_id.lock() = Some(phase_id.to_owned());
        Ok(())
    }

    /// Phases in execution order (by `index`).
    pub fn ordered_phases(&self) -> Vec<&TaskPhase> {
        let mut ordered: Vec<&TaskPhase> = self.phases.iter().collect();
        ordered.sort_by_key(|p| p.index);
        ordered
    }

    /// The next phases that may start now.
    ///
    /// Walks phases in index order past DONE ones.  A sequential TODO phase
    /// runs alone; a parallel TODO phase runs together with the parallel
    /// TODO phases right after it.  Empty while an earlier phase is running
    /// or failed, or when the plan is finished.
    pub fn next_batch(&self) -> Vec<&TaskPhase> {
        let mut batch = Vec::new();
        for phase in self.ordered_phases() {
            let status = phase.status();
            if status == PhaseStatus::Done {
                continue;
            }
            if status != PhaseStatus::Todo {
                break;
            }
            if !phase.is_parallel {
                if batch.is_empty() {
                    batch.push(phase);
                }
                break;
            }
            batch.push(phase);
        }
        batch
    }

    /// Send a FAILED phase back to TODO, subject to the retry limit.
    pub fn retry(&self, phase_id: &str) -> Result<()> {
        let phase = self
            .phase(phase_id)
            .ok_or_else(|| Error::PhaseNotFound(phase_id.to_owned()))?;
        phase.retry(self.max_retries)
    }

    pub fn is_finished(&self) -> bool {
        self.phases.iter().all(|p| p.status() == PhaseStatus::Done)
    }

    pub fn has_failed(&self) -> bool {
        self.phases.iter().any(|p| p.status() == PhaseStatus::Failed)
    }

    pub fn snapshot(&self) -> TaskPlanSnapshot {
        TaskPlanSnapshot {
            goal: self.goal.clone(),
            current_task_id: self.current_task_id(),
            phases: self.ordered_phases().iter().map(|p| p.snapshot()).collect(),
        }
    }
}
