//! The sealed lifecycle event taxonomy emitted by the run loop.
//!
//! Events are the runtime's observable surface: streaming, persistence, and
//! audit all consume the same ordered stream. Every variant has a stable
//! JSON encoding (a `type` discriminator plus documented keys) so events can
//! cross an activity boundary and be reconstructed losslessly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::ProviderFailure;
use crate::id::{AgentId, RunId, SessionId, ToolCallId, TurnId};
use crate::message::{ContentBlock, Message};
use crate::plan::{RetryHint, Usage};
use crate::tool::{ArtifactsMode, ToolResult};

/// Phases a run moves through, surfaced via [`EventPayload::RunPhaseChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Building planner input and invoking the plan activity.
    Planning,
    /// Executing the turn's tool batch.
    ExecutingTools,
    /// Blocked on an await or operator pause.
    Paused,
    /// Merging results and preparing the next plan turn.
    Resuming,
    /// Driving a terminal plan turn after a budget or cap trip.
    Finalizing,
    /// Terminal.
    Completed,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The planner produced a final response.
    Success,
    /// The run failed terminally.
    Failed,
    /// The run was canceled.
    Canceled,
}

/// Why a run paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Awaiting a clarification answer.
    AwaitClarification,
    /// Awaiting externally-executed tool results.
    AwaitExternalTools,
    /// Awaiting a confirmation decision.
    AwaitConfirmation,
    /// An operator pause signal.
    Human,
    /// Bracketing the finalizing plan turn after a deadline trip.
    Finalize,
}

/// Why a run resumed. Every [`PauseReason`] is balanced by exactly one of
/// these (or by the terminal completion event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeReason {
    /// The matching clarification answer arrived.
    Clarification,
    /// The matching external tool results arrived.
    ToolResults,
    /// The matching confirmation decision arrived.
    Confirmation,
    /// An operator resume signal.
    Operator,
    /// The clarification await timed out.
    ClarificationTimeout,
    /// The external-tools await timed out.
    ToolResultsTimeout,
    /// The confirmation await timed out.
    ConfirmationTimeout,
    /// The run's wall-clock budget elapsed while paused.
    DeadlineExceeded,
    /// The run was canceled while paused.
    Canceled,
    /// Closing the finalize bracket.
    Finalize,
}

/// The per-variant payload of a run event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// The run started.
    RunStarted {
        /// Attempt number, increasing across resumes.
        attempt: u32,
    },
    /// The run moved to a new phase.
    RunPhaseChanged {
        /// The new phase.
        phase: RunPhase,
    },
    /// The run paused.
    RunPaused {
        /// Why.
        reason: PauseReason,
        /// Operator-supplied detail, when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// The run resumed.
    RunResumed {
        /// Why.
        reason: ResumeReason,
    },
    /// A nested agent run started under this run.
    AgentRunStarted {
        /// The child run.
        child_run_id: RunId,
        /// The child agent.
        child_agent_id: AgentId,
        /// The parent tool call that spawned it.
        parent_tool_call_id: ToolCallId,
    },
    /// A tool call was scheduled.
    ToolCallScheduled {
        /// The call id.
        call_id: ToolCallId,
        /// Fully-qualified tool name.
        tool_name: String,
        /// Requested artifacts handling.
        artifacts: ArtifactsMode,
    },
    /// A scheduled call's expected-children count was bumped.
    ToolCallUpdated {
        /// The call id.
        call_id: ToolCallId,
        /// New expected-children count.
        expected_children: u32,
    },
    /// A tool result (success or error) arrived for a scheduled call.
    ToolResultReceived {
        /// The result.
        result: ToolResult,
    },
    /// A free-form planner note.
    PlannerNote {
        /// The note.
        note: String,
    },
    /// A thinking or redacted-thinking block streamed by the planner.
    ThinkingBlock {
        /// The block, carried verbatim.
        block: ContentBlock,
    },
    /// The assistant's message to the user.
    AssistantMessage {
        /// The message.
        message: Message,
    },
    /// A retry hint was issued to the planner.
    RetryHintIssued {
        /// The hint.
        hint: RetryHint,
    },
    /// A note was appended to agent memory.
    MemoryAppended {
        /// The note.
        note: String,
    },
    /// A policy decision on a requested tool call.
    PolicyDecision {
        /// The tool the decision applies to.
        tool_name: String,
        /// Whether the call was allowed.
        allowed: bool,
        /// Why, when rejected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Token usage reported for a plan turn.
    Usage {
        /// The usage delta.
        usage: Usage,
    },
    /// The run is awaiting a clarification answer.
    AwaitClarification {
        /// Correlation id.
        id: String,
        /// The question.
        question: String,
    },
    /// The run is awaiting externally-executed tool results.
    AwaitExternalTools {
        /// The calls whose results are expected.
        call_ids: Vec<ToolCallId>,
    },
    /// The run is awaiting a confirmation decision.
    AwaitConfirmation {
        /// Correlation id.
        id: String,
        /// The prompt.
        prompt: String,
    },
    /// A tool call required and received (or was refused) authorization.
    ToolAuthorization {
        /// The call id.
        call_id: ToolCallId,
        /// Fully-qualified tool name.
        tool_name: String,
        /// Whether the call was authorized.
        authorized: bool,
    },
    /// A hard protection rule fired.
    HardProtectionTriggered {
        /// Rule identifier, e.g. `agent_tool_no_children`.
        reason: String,
        /// Agent-tool calls executed this turn.
        executed_agent_tools: u32,
        /// Children those calls produced in total.
        children_total: u32,
    },
    /// The run reached a terminal state.
    RunCompleted {
        /// Terminal status.
        status: CompletionStatus,
        /// The final assistant message, on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_message: Option<Message>,
        /// Failure descriptor, flattened into the payload. Present on
        /// `Failed`, absent on success and cancel; its `public_error` is the
        /// deterministic user-safe string.
        #[serde(flatten)]
        failure: Option<ProviderFailure>,
    },
}

impl EventPayload {
    /// Whether this payload terminates the run's event stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. })
    }
}

/// A lifecycle event: the common envelope plus a variant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// The run the event belongs to.
    pub run_id: RunId,
    /// The session the run belongs to.
    pub session_id: SessionId,
    /// The agent being run.
    pub agent_id: AgentId,
    /// The turn within the session, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    /// Workflow time at emission.
    pub at: DateTime<Utc>,
    /// The variant payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl RunEvent {
    /// Stamp an event with the ids of a run context and a workflow timestamp.
    #[must_use]
    pub fn stamp(ctx: &RunContext, at: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            session_id: ctx.session_id.clone(),
            agent_id: ctx.agent_id.clone(),
            turn_id: ctx.turn_id.clone(),
            at,
            payload,
        }
    }

    /// Stable JSON encoding of this event.
    ///
    /// # Errors
    ///
    /// Serialization errors from `serde_json` (not expected for any variant).
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode an event previously produced by [`RunEvent::encode`].
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the bytes are not a valid event.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderFailure, ProviderFailureKind};
    use crate::plan::{RetryReason, Usage};
    use crate::tool::ToolResult;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::top_level("svc.chat".into(), "r-1".into(), "s-1".into())
    }

    fn all_payloads() -> Vec<EventPayload> {
        vec![
            EventPayload::RunStarted { attempt: 1 },
            EventPayload::RunPhaseChanged {
                phase: RunPhase::Planning,
            },
            EventPayload::RunPaused {
                reason: PauseReason::Human,
                detail: Some("operator".into()),
            },
            EventPayload::RunResumed {
                reason: ResumeReason::DeadlineExceeded,
            },
            EventPayload::AgentRunStarted {
                child_run_id: "r-2".into(),
                child_agent_id: "svc.helper".into(),
                parent_tool_call_id: "t-1".into(),
            },
            EventPayload::ToolCallScheduled {
                call_id: "t-1".into(),
                tool_name: "helpers.answer".into(),
                artifacts: ArtifactsMode::Auto,
            },
            EventPayload::ToolCallUpdated {
                call_id: "t-1".into(),
                expected_children: 2,
            },
            EventPayload::ToolResultReceived {
                result: ToolResult::success("helpers.answer", "t-1".into(), json!({"text": "4"})),
            },
            EventPayload::PlannerNote {
                note: "thinking about it".into(),
            },
            EventPayload::ThinkingBlock {
                block: ContentBlock::Thinking {
                    thinking: "let me see".into(),
                    signature: "sig-1".into(),
                },
            },
            EventPayload::AssistantMessage {
                message: Message::assistant("hello"),
            },
            EventPayload::RetryHintIssued {
                hint: RetryHint::new(RetryReason::PerTurnCap, "trimmed to cap"),
            },
            EventPayload::MemoryAppended {
                note: "user prefers metric units".into(),
            },
            EventPayload::PolicyDecision {
                tool_name: "helpers.answer".into(),
                allowed: false,
                reason: Some("denied tag".into()),
            },
            EventPayload::Usage {
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 4,
                },
            },
            EventPayload::AwaitClarification {
                id: "c1".into(),
                question: "which?".into(),
            },
            EventPayload::AwaitExternalTools {
                call_ids: vec!["t-1".into()],
            },
            EventPayload::AwaitConfirmation {
                id: "k1".into(),
                prompt: "proceed?".into(),
            },
            EventPayload::ToolAuthorization {
                call_id: "t-1".into(),
                tool_name: "helpers.answer".into(),
                authorized: true,
            },
            EventPayload::HardProtectionTriggered {
                reason: "agent_tool_no_children".into(),
                executed_agent_tools: 1,
                children_total: 0,
            },
            EventPayload::RunCompleted {
                status: CompletionStatus::Failed,
                final_message: None,
                failure: Some(ProviderFailure {
                    provider: "anthropic".into(),
                    operation: "complete".into(),
                    kind: ProviderFailureKind::RateLimited,
                    code: Some("rate_limit_error".into()),
                    http_status: Some(429),
                    retryable: true,
                    public_error: "The model is briefly overloaded.".into(),
                }),
            },
        ]
    }

    #[test]
    fn every_variant_round_trips() {
        for payload in all_payloads() {
            let event = RunEvent::stamp(&ctx(), Utc::now(), payload);
            let bytes = event.encode().unwrap();
            let decoded = RunEvent::decode(&bytes).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn discriminator_is_snake_case_type_string() {
        let event = RunEvent::stamp(&ctx(), Utc::now(), EventPayload::RunStarted { attempt: 1 });
        let value: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "run_started");
        assert_eq!(value["run_id"], "r-1");
    }

    #[test]
    fn run_completed_flattens_provider_descriptor() {
        let payload = all_payloads().pop().unwrap();
        assert!(matches!(payload, EventPayload::RunCompleted { .. }));
        let event = RunEvent::stamp(&ctx(), Utc::now(), payload);
        let value: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "run_completed");
        assert_eq!(value["provider"], "anthropic");
        assert_eq!(value["http_status"], 429);
        assert_eq!(value["retryable"], true);
    }

    #[test]
    fn only_run_completed_is_terminal() {
        for payload in all_payloads() {
            let terminal = matches!(payload, EventPayload::RunCompleted { .. });
            assert_eq!(payload.is_terminal(), terminal);
        }
    }
}
