//! Planner inputs and outputs: plan results, tool calls, awaits, retry hints.

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::id::ToolCallId;
use crate::message::Message;

/// A tool call requested by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier for this call; matched by the eventual result.
    pub id: ToolCallId,
    /// Fully-qualified tool name (`toolset.tool`).
    pub name: String,
    /// Raw JSON payload as the planner produced it.
    pub payload: serde_json::Value,
}

/// A final response ending the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    /// The assistant message delivered to the caller.
    pub message: Message,
}

/// An await requested by the planner: the run pauses until the matching
/// signal arrives or the time budget expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AwaitRequest {
    /// Wait for a human clarification answer.
    Clarification {
        /// Correlation id echoed back by the answer signal.
        id: String,
        /// The question shown to the operator.
        question: String,
    },
    /// Wait for externally-executed tool results. The declared calls are
    /// appended to the transcript as assistant tool uses; the provided
    /// results must answer them in order.
    ExternalTools {
        /// The tool calls executed outside the runtime.
        calls: Vec<ToolCall>,
    },
    /// Wait for a confirmation decision.
    Confirmation {
        /// Correlation id echoed back by the decision signal.
        id: String,
        /// The prompt shown to the operator.
        prompt: String,
        /// The tool call awaiting authorization, when the confirmation
        /// gates one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<ToolCallId>,
        /// The gated tool's name, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
}

impl AwaitRequest {
    /// The correlation id of this await, when it has one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Clarification { id, .. } | Self::Confirmation { id, .. } => Some(id),
            Self::ExternalTools { .. } => None,
        }
    }
}

/// Why a retry hint was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// The payload failed schema validation.
    InvalidArguments,
    /// Required payload fields were missing.
    MissingFields,
    /// The requested tool is not registered or not allowed.
    ToolUnavailable,
    /// The tool or provider was rate limited.
    RateLimited,
    /// The call timed out.
    Timeout,
    /// A result failed to decode against the declared schema.
    SchemaMismatch,
    /// The planner requested more calls than the per-turn cap permits.
    PerTurnCap,
    /// Consecutive tool failures reached the run's cap.
    FailureCap,
}

/// A structured hint telling the planner how to self-correct next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryHint {
    /// Why the hint was issued.
    pub reason: RetryReason,
    /// Human-readable guidance for the planner.
    pub message: String,
    /// Fields that were missing or invalid, when known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl RetryHint {
    /// Build a hint with a reason and message and no field list.
    pub fn new(reason: RetryReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Attach the offending field names.
    #[must_use]
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }
}

/// Token usage reported by the planner for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the input/prompt.
    pub input_tokens: u64,
    /// Tokens in the output/completion.
    pub output_tokens: u64,
}

impl Usage {
    /// Accumulate another delta into this total.
    pub fn add(&mut self, delta: &Usage) {
        self.input_tokens += delta.input_tokens;
        self.output_tokens += delta.output_tokens;
    }
}

/// The planner's decision for one turn.
///
/// Exactly one of `tool_calls`, `final_response`, or `await_` must be
/// populated on a live turn; `retry_hint` may coexist with `tool_calls`
/// when the planner is self-correcting. [`PlanResult::validate`] enforces
/// this before the loop acts on the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Tools to execute this turn, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Final response ending the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<FinalResponse>,
    /// Await pausing the run.
    #[serde(default, rename = "await", skip_serializing_if = "Option::is_none")]
    pub await_: Option<AwaitRequest>,
    /// Self-correction hint carried into the next turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_hint: Option<RetryHint>,
    /// How many child runs the planner expects its agent-tool calls to spawn.
    #[serde(default)]
    pub expected_children: u32,
    /// Whether the final response was already streamed to the caller, so the
    /// loop suppresses the duplicate assistant-message event.
    #[serde(default)]
    pub streamed: bool,
    /// Free-form planner notes surfaced as events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl PlanResult {
    /// A result carrying only tool calls.
    #[must_use]
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    /// A result carrying only a final assistant message.
    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            final_response: Some(FinalResponse {
                message: Message::assistant(text),
            }),
            ..Default::default()
        }
    }

    /// A result carrying only an await.
    #[must_use]
    pub fn awaiting(await_: AwaitRequest) -> Self {
        Self {
            await_: Some(await_),
            ..Default::default()
        }
    }

    /// Check the exactly-one rule for a live turn.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation when zero or more than one of
    /// the mutually exclusive outcomes is populated. A lone `retry_hint`
    /// also fails: a hint may only accompany tool calls.
    pub fn validate(&self) -> Result<(), String> {
        let populated = [
            !self.tool_calls.is_empty(),
            self.final_response.is_some(),
            self.await_.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        match populated {
            0 => Err("planner result malformed: no tool calls, final response, or await".into()),
            1 => Ok(()),
            _ => Err(
                "planner result malformed: tool calls, final response, and await are mutually exclusive"
                    .into(),
            ),
        }
    }
}

/// Why the loop asked the planner for a finalizing turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    /// The run's wall-clock budget elapsed.
    TimeBudget,
    /// Consecutive tool failures reached the cap.
    FailureCap,
    /// The run-level tool-call cap was exhausted.
    ToolCallCap,
    /// A tool reported missing fields and policy chose to finalize.
    MissingFields,
    /// Agent-tool calls produced zero children.
    HardProtection,
}

/// Input to the first plan turn of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInput {
    /// The run context, refreshed with remaining caps and budget.
    pub context: RunContext,
    /// The conversation so far.
    pub messages: Vec<Message>,
}

/// Input to every plan turn after the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResumeInput {
    /// The run context, refreshed with remaining caps and budget.
    pub context: RunContext,
    /// The conversation so far, including the latest tool results.
    pub messages: Vec<Message>,
    /// Hint carried over from the previous turn, if any.
    pub retry_hint: Option<RetryHint>,
    /// Set when the loop needs a terminal answer rather than more work.
    pub finalize: Option<FinalizeReason>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exactly_one_outcome_is_required() {
        assert!(PlanResult::default().validate().is_err());
        assert!(PlanResult::final_text("done").validate().is_ok());
        assert!(
            PlanResult::calls(vec![ToolCall {
                id: "t1".into(),
                name: "a.b".into(),
                payload: json!({}),
            }])
            .validate()
            .is_ok()
        );
    }

    #[test]
    fn await_plus_tool_calls_is_rejected() {
        let mut result = PlanResult::calls(vec![ToolCall {
            id: "t1".into(),
            name: "a.b".into(),
            payload: json!({}),
        }]);
        result.await_ = Some(AwaitRequest::Clarification {
            id: "c1".into(),
            question: "which?".into(),
        });
        assert!(result.validate().is_err());
    }

    #[test]
    fn retry_hint_may_accompany_tool_calls() {
        let mut result = PlanResult::calls(vec![ToolCall {
            id: "t1".into(),
            name: "a.b".into(),
            payload: json!({}),
        }]);
        result.retry_hint = Some(RetryHint::new(RetryReason::InvalidArguments, "fix it"));
        assert!(result.validate().is_ok());
    }

    #[test]
    fn await_round_trips_with_kind_tag() {
        let await_ = AwaitRequest::ExternalTools {
            calls: vec![ToolCall {
                id: "t1".into(),
                name: "ext.lookup".into(),
                payload: json!({"q": "x"}),
            }],
        };
        let value = serde_json::to_value(&await_).unwrap();
        assert_eq!(value["kind"], "external_tools");
        assert_eq!(serde_json::from_value::<AwaitRequest>(value).unwrap(), await_);
    }
}
