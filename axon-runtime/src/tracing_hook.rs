//! A hook-bus subscriber that mirrors run events to [`tracing`].
//!
//! Observes, never controls: it always returns `Ok`. Wire any
//! `tracing`-compatible subscriber (`tracing-subscriber` for stdout,
//! OpenTelemetry exporters for traces) to consume the output.

use async_trait::async_trait;

use axon_hooks::Subscriber;
use axon_types::{EventPayload, HookError, RunEvent};

/// Mirrors run events to structured `tracing` events.
///
/// | Event | Level |
/// |-------|-------|
/// | phase changes, tool scheduling/results, planner notes | `DEBUG` |
/// | run started/paused/resumed/completed, hard protections | `INFO` |
pub struct TracingSubscriber;

impl TracingSubscriber {
    /// Create the subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscriber for TracingSubscriber {
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError> {
        let run = event.run_id.as_str();
        let agent = event.agent_id.as_str();
        match &event.payload {
            EventPayload::RunStarted { attempt } => {
                tracing::info!(run, agent, attempt, "axon.run.started");
            }
            EventPayload::RunPhaseChanged { phase } => {
                tracing::debug!(run, agent, ?phase, "axon.run.phase");
            }
            EventPayload::RunPaused { reason, .. } => {
                tracing::info!(run, agent, ?reason, "axon.run.paused");
            }
            EventPayload::RunResumed { reason } => {
                tracing::info!(run, agent, ?reason, "axon.run.resumed");
            }
            EventPayload::ToolCallScheduled { call_id, tool_name, .. } => {
                tracing::debug!(run, agent, call = %call_id, tool = %tool_name, "axon.tool.scheduled");
            }
            EventPayload::ToolResultReceived { result } => {
                tracing::debug!(
                    run,
                    agent,
                    call = %result.call_id,
                    tool = %result.tool_name,
                    is_error = result.is_error(),
                    "axon.tool.result"
                );
            }
            EventPayload::PlannerNote { note } => {
                tracing::debug!(run, agent, note, "axon.planner.note");
            }
            EventPayload::RetryHintIssued { hint } => {
                tracing::debug!(run, agent, reason = ?hint.reason, "axon.retry_hint");
            }
            EventPayload::HardProtectionTriggered {
                reason,
                executed_agent_tools,
                children_total,
            } => {
                tracing::info!(
                    run,
                    agent,
                    reason,
                    executed_agent_tools,
                    children_total,
                    "axon.hard_protection"
                );
            }
            EventPayload::RunCompleted { status, .. } => {
                tracing::info!(run, agent, ?status, "axon.run.completed");
            }
            _ => {
                tracing::trace!(run, agent, "axon.run.event");
            }
        }
        Ok(())
    }
}
