//! The immutable per-run context threaded through plan and tool invocations.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::{AgentId, RunId, SessionId, ToolCallId, TurnId};

/// Linkage from a nested run back to the parent turn that spawned it.
///
/// Stored as ids, never as object references: child runs complete before the
/// parent's tool batch resolves, so no structure can refer to a live run
/// after its completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    /// The parent run.
    pub run_id: RunId,
    /// The parent tool call that scheduled this run.
    pub tool_call_id: ToolCallId,
    /// The parent agent.
    pub agent_id: AgentId,
}

/// Immutable context describing one run, rebuilt with refreshed budget
/// figures before every plan turn.
///
/// All parent fields are empty iff the run is top-level; [`ParentLink`]
/// groups them so the all-or-nothing invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// The agent being run.
    pub agent_id: AgentId,
    /// This run.
    pub run_id: RunId,
    /// The session the run belongs to.
    pub session_id: SessionId,
    /// The turn within the session, if the caller supplied one.
    pub turn_id: Option<TurnId>,
    /// Parent linkage; `None` for top-level runs.
    pub parent: Option<ParentLink>,
    /// Attempt counter, monotonically increasing across resumes.
    pub attempt: u32,
    /// Free-form labels attached by the caller.
    pub labels: HashMap<String, String>,
    /// Remaining wall-clock budget at the moment this context was built.
    pub remaining_time_budget: Option<Duration>,
}

impl RunContext {
    /// Build a top-level run context.
    pub fn top_level(agent_id: AgentId, run_id: RunId, session_id: SessionId) -> Self {
        Self {
            agent_id,
            run_id,
            session_id,
            turn_id: None,
            parent: None,
            attempt: 1,
            labels: HashMap::new(),
            remaining_time_budget: None,
        }
    }

    /// Derive the context for a nested run spawned by `tool_call_id`.
    pub fn child(&self, agent_id: AgentId, run_id: RunId, tool_call_id: ToolCallId) -> Self {
        Self {
            agent_id,
            run_id,
            session_id: self.session_id.clone(),
            turn_id: self.turn_id.clone(),
            parent: Some(ParentLink {
                run_id: self.run_id.clone(),
                tool_call_id,
                agent_id: self.agent_id.clone(),
            }),
            attempt: 1,
            labels: self.labels.clone(),
            remaining_time_budget: self.remaining_time_budget,
        }
    }

    /// Whether this is a top-level run.
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Copy with a refreshed remaining budget.
    pub fn with_remaining(mut self, remaining: Option<Duration>) -> Self {
        self.remaining_time_budget = remaining;
        self
    }

    /// Copy with the attempt counter bumped, used when a run resumes.
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RunContext {
        RunContext::top_level("svc.chat".into(), "r-1".into(), "s-1".into())
    }

    #[test]
    fn top_level_has_no_parent() {
        let ctx = ctx();
        assert!(ctx.is_top_level());
        assert_eq!(ctx.attempt, 1);
    }

    #[test]
    fn child_links_all_parent_fields() {
        let parent = ctx();
        let child = parent.child("svc.helper".into(), "r-2".into(), "t-1".into());
        assert!(!child.is_top_level());
        let link = child.parent.unwrap();
        assert_eq!(link.run_id, parent.run_id);
        assert_eq!(link.agent_id, parent.agent_id);
        assert_eq!(link.tool_call_id, ToolCallId::new("t-1"));
        assert_eq!(child.session_id, parent.session_id);
    }

    #[test]
    fn attempt_increments_on_resume() {
        let ctx = ctx().next_attempt().next_attempt();
        assert_eq!(ctx.attempt, 3);
    }
}
