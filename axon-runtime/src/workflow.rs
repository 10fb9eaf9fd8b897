//! Engine handlers the runtime registers per agent: the run workflow and
//! the plan / execute-tool activities.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;

use axon_engine::{ActivityError, ActivityHandler, EngineError, WorkflowContext, WorkflowHandler};
use axon_loop::{BufferedPlannerEvents, PlanActivityInput, PlanActivityOutput, WorkflowRunInput};
use axon_tool::ToolsetBackend;
use axon_types::{AgentId, MemoryEntry, Planner, PlannerContext, ToolError, ToolRequest};

use crate::registry::RuntimeInner;

fn runtime_gone() -> ActivityError {
    ActivityError::Terminal("runtime has shut down".to_string())
}

/// Runs the plan/execute/resume machine for one agent's workflow type.
pub(crate) struct AgentWorkflowHandler {
    pub(crate) inner: Weak<RuntimeInner>,
}

#[async_trait]
impl WorkflowHandler for AgentWorkflowHandler {
    async fn run(
        &self,
        ctx: Arc<dyn WorkflowContext>,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| EngineError::WorkflowFailed("runtime has shut down".to_string()))?;
        let input: WorkflowRunInput = serde_json::from_value(input)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let run_id = input.context.run_id.clone();
        let output = inner.machine.run(ctx, input).await;
        inner.drop_run_scratch(&run_id);
        let output = output?;
        serde_json::to_value(output).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

/// Executes one plan turn: builds the planner context, invokes the planner,
/// persists its notes to memory, and ships streamed events back to the loop.
pub(crate) struct PlanActivityHandler {
    pub(crate) inner: Weak<RuntimeInner>,
    pub(crate) agent_id: AgentId,
    pub(crate) planner: Arc<dyn Planner>,
}

#[async_trait]
impl ActivityHandler for PlanActivityHandler {
    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ActivityError> {
        let inner = self.inner.upgrade().ok_or_else(runtime_gone)?;
        let input: PlanActivityInput = serde_json::from_value(input)
            .map_err(|e| ActivityError::Terminal(format!("bad plan input: {e}")))?;
        let run = match &input {
            PlanActivityInput::Start { input } => input.context.clone(),
            PlanActivityInput::Resume { input } => input.context.clone(),
        };

        let sink = Arc::new(BufferedPlannerEvents::new());
        let planner_ctx = PlannerContext {
            agent_id: self.agent_id.clone(),
            run: run.clone(),
            memory: inner.memory_reader.clone(),
            state: inner.run_scratch(&run.run_id),
            events: sink.clone(),
        };

        let outcome = match input {
            PlanActivityInput::Start { input } => self.planner.plan_start(planner_ctx, input).await,
            PlanActivityInput::Resume { input } => {
                self.planner.plan_resume(planner_ctx, input).await
            }
        };

        if let Ok(plan) = &outcome {
            for note in &plan.notes {
                let entry = MemoryEntry {
                    session_id: run.session_id.clone(),
                    agent_id: self.agent_id.clone(),
                    note: note.clone(),
                    at: Utc::now(),
                };
                if let Err(e) = inner.memory.append(entry).await {
                    tracing::warn!(run_id = %run.run_id, error = %e, "failed to persist planner note");
                }
            }
        }

        let output = PlanActivityOutput::from_outcome(outcome, sink.drain());
        serde_json::to_value(output).map_err(|e| ActivityError::Terminal(e.to_string()))
    }
}

/// Executes one activity-backed tool call via its toolset's executor.
/// Executor panics are contained here and surfaced as terminal errors.
pub(crate) struct ExecuteToolActivityHandler {
    pub(crate) inner: Weak<RuntimeInner>,
}

#[async_trait]
impl ActivityHandler for ExecuteToolActivityHandler {
    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ActivityError> {
        let inner = self.inner.upgrade().ok_or_else(runtime_gone)?;
        let request: ToolRequest = serde_json::from_value(input)
            .map_err(|e| ActivityError::Terminal(format!("bad tool request: {e}")))?;
        let toolset = inner
            .toolsets
            .toolset(&request.toolset)
            .ok_or_else(|| ActivityError::Terminal(format!("unknown toolset: {}", request.toolset)))?;
        let ToolsetBackend::Activity(executor) = &toolset.backend else {
            return Err(ActivityError::Terminal(
                "inline toolsets cannot execute as activities".to_string(),
            ));
        };

        let executor = executor.clone();
        let joined = tokio::spawn(async move { executor.execute(request).await }).await;
        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(tool_error_to_activity(e)),
            Err(join_err) if join_err.is_panic() => Err(ActivityError::Terminal(
                "tool executor panicked".to_string(),
            )),
            Err(join_err) => Err(ActivityError::Terminal(join_err.to_string())),
        }
    }
}

fn tool_error_to_activity(err: ToolError) -> ActivityError {
    match err {
        ToolError::Timeout(_) => ActivityError::Transient(err.to_string()),
        ToolError::ExecutionFailed(_)
        | ToolError::NotFound(_)
        | ToolError::InvalidPayload(_)
        | ToolError::NotAllowed(_)
        | ToolError::Cancelled => ActivityError::Terminal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient_everything_else_terminal() {
        assert!(
            tool_error_to_activity(ToolError::Timeout(std::time::Duration::from_secs(1)))
                .is_retryable()
        );
        assert!(!tool_error_to_activity(ToolError::NotFound("x".into())).is_retryable());
        assert!(
            !tool_error_to_activity(ToolError::ExecutionFailed("boom".into())).is_retryable()
        );
    }
}
