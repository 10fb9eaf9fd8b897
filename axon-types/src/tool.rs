//! Tool requests, results, and the metadata attached to them.

use serde::{Deserialize, Serialize};

use crate::id::{AgentId, RunId, SessionId, ToolCallId, ToolsetId, TurnId};
use crate::plan::RetryHint;

/// Requested handling of tool artifacts, parsed from the reserved
/// `artifacts` payload field before validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactsMode {
    /// The tool decides (default).
    #[default]
    Auto,
    /// Artifacts are attached when the tool declares them.
    On,
    /// Artifacts are suppressed.
    Off,
}

/// Bounded-result metadata extracted from a decoded tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedMeta {
    /// Total matching items before bounding.
    pub total: u64,
    /// Items actually returned.
    pub returned: u64,
    /// Whether the result was truncated.
    pub truncated: bool,
}

/// Telemetry attached to a tool result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolTelemetry {
    /// Wall-clock execution time, when measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Bounded-result metadata, when the result declared it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounded: Option<BoundedMeta>,
}

/// The error side of a tool result. Serializable so it survives the
/// activity boundary; the cause chain is flattened into `detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    /// Primary error message.
    pub message: String,
    /// Flattened cause chain, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<String>,
}

impl ToolFailure {
    /// Build a failure from a message alone.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: Vec::new(),
        }
    }

    /// Build a failure from an error, walking its source chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut detail = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            detail.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            detail,
        }
    }
}

/// Success-or-error outcome of a tool execution. The two sides are mutually
/// exclusive by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The decoded result value.
    Success {
        /// Decoded result JSON.
        value: serde_json::Value,
    },
    /// The execution failed.
    Error {
        /// The failure description.
        failure: ToolFailure,
    },
}

impl ToolOutcome {
    /// Whether this outcome is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// The result of one executed (or rejected) tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Fully-qualified tool name.
    pub tool_name: String,
    /// The scheduled call this result answers.
    pub call_id: ToolCallId,
    /// Success or error.
    pub outcome: ToolOutcome,
    /// Execution telemetry.
    #[serde(default)]
    pub telemetry: ToolTelemetry,
    /// Hint for the planner's next turn, when the error shape suggests one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_hint: Option<RetryHint>,
    /// Child runs spawned by this call (agent tools only).
    #[serde(default)]
    pub children: u32,
    /// The nested run, when this call executed an agent tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_run_id: Option<RunId>,
    /// Human-readable preview rendered from the tool's result-hint template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl ToolResult {
    /// A successful result with no extra metadata.
    #[must_use]
    pub fn success(tool_name: impl Into<String>, call_id: ToolCallId, value: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            call_id,
            outcome: ToolOutcome::Success { value },
            telemetry: ToolTelemetry::default(),
            retry_hint: None,
            children: 0,
            nested_run_id: None,
            preview: None,
        }
    }

    /// A failed result, optionally carrying a retry hint.
    #[must_use]
    pub fn error(
        tool_name: impl Into<String>,
        call_id: ToolCallId,
        failure: ToolFailure,
        retry_hint: Option<RetryHint>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            call_id,
            outcome: ToolOutcome::Error { failure },
            telemetry: ToolTelemetry::default(),
            retry_hint,
            children: 0,
            nested_run_id: None,
            preview: None,
        }
    }

    /// Whether the outcome is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }

    /// The result content appended to the transcript for this call.
    #[must_use]
    pub fn transcript_content(&self) -> serde_json::Value {
        match &self.outcome {
            ToolOutcome::Success { value } => value.clone(),
            ToolOutcome::Error { failure } => serde_json::json!({
                "error": failure.message,
                "detail": failure.detail,
            }),
        }
    }
}

/// The request handed to a tool executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// The run that scheduled the call.
    pub run_id: RunId,
    /// The agent that owns the run.
    pub agent_id: AgentId,
    /// The toolset owning the tool.
    pub toolset: ToolsetId,
    /// Unqualified tool name within the toolset.
    pub tool: String,
    /// The scheduled call id.
    pub call_id: ToolCallId,
    /// Validated payload with reserved fields stripped.
    pub payload: serde_json::Value,
    /// Requested artifacts handling.
    #[serde(default)]
    pub artifacts: ArtifactsMode,
    /// The session the run belongs to.
    pub session_id: SessionId,
    /// The turn within the session, when known.
    pub turn_id: Option<TurnId>,
    /// The parent tool call, for nested runs.
    pub parent_tool_call_id: Option<ToolCallId>,
}
