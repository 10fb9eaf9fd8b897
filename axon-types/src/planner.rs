//! The planner port: the user-supplied policy the loop drives each turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::{ProviderFailure, StoreError};
use crate::id::{AgentId, SessionId};
use crate::message::ContentBlock;
use crate::plan::{PlanInput, PlanResult, PlanResumeInput, Usage};
use crate::store::MemoryEntry;

/// Read-only access to agent memory, exposed to planners.
#[async_trait]
pub trait MemoryReader: Send + Sync {
    /// Read up to `limit` notes for a session/agent pair, oldest first.
    async fn read(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError>;
}

/// Sink for events a planner streams mid-turn: assistant text chunks,
/// thinking blocks, free-form notes, and usage deltas. The loop mirrors
/// whatever lands here onto the hook bus after the plan activity returns.
pub trait PlannerEvents: Send + Sync {
    /// An incremental chunk of the assistant's answer.
    fn assistant_chunk(&self, text: &str);
    /// A thinking or redacted-thinking block, carried verbatim.
    fn thinking_block(&self, block: ContentBlock);
    /// A free-form planner note.
    fn note(&self, note: &str);
    /// A token-usage delta.
    fn usage(&self, delta: Usage);
}

/// A [`PlannerEvents`] sink that discards everything.
pub struct NullPlannerEvents;

impl PlannerEvents for NullPlannerEvents {
    fn assistant_chunk(&self, _text: &str) {}
    fn thinking_block(&self, _block: ContentBlock) {}
    fn note(&self, _note: &str) {}
    fn usage(&self, _delta: Usage) {}
}

/// Context handed to a planner for one turn.
///
/// Logging and metrics go through `tracing` as everywhere else in the
/// runtime; the context carries the identifiers to tag spans with.
#[derive(Clone)]
pub struct PlannerContext {
    /// The agent being planned for.
    pub agent_id: AgentId,
    /// The run context, refreshed with remaining caps and budget.
    pub run: RunContext,
    /// Read-only agent memory.
    pub memory: Arc<dyn MemoryReader>,
    /// Per-run ephemeral scratch state, shared across the run's turns.
    pub state: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    /// Streaming sink for mid-turn planner events.
    pub events: Arc<dyn PlannerEvents>,
}

impl std::fmt::Debug for PlannerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerContext")
            .field("agent_id", &self.agent_id)
            .field("run_id", &self.run.run_id)
            .finish_non_exhaustive()
    }
}

/// The planner: decides, per turn, whether to answer, call tools, or await.
///
/// Planner errors are provider-shaped: the descriptor propagates into the
/// terminal `run_completed` payload when the loop cannot recover.
#[async_trait]
pub trait Planner: Send + Sync {
    /// The first plan turn of a run.
    async fn plan_start(
        &self,
        ctx: PlannerContext,
        input: PlanInput,
    ) -> Result<PlanResult, ProviderFailure>;

    /// Every plan turn after the first.
    async fn plan_resume(
        &self,
        ctx: PlannerContext,
        input: PlanResumeInput,
    ) -> Result<PlanResult, ProviderFailure>;
}

/// An empty memory reader for planners that do not use memory.
pub struct NullMemory;

#[async_trait]
impl MemoryReader for NullMemory {
    async fn read(
        &self,
        _session_id: &SessionId,
        _agent_id: &AgentId,
        _limit: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        Ok(Vec::new())
    }
}
