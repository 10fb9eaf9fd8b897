//! Typed receivers over the reserved signal channels.
//!
//! Payload structs are lenient: every field is defaulted, so an operator
//! sending a bare `{}` still resumes a run instead of wedging it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use axon_engine::{EngineError, SignalChannel, WorkflowContext};
use axon_types::ToolCallId;

/// Reserved signal name: operator pause.
pub const SIGNAL_PAUSE: &str = "pause";
/// Reserved signal name: operator resume.
pub const SIGNAL_RESUME: &str = "resume";
/// Reserved signal name: clarification answer.
pub const SIGNAL_CLARIFICATION: &str = "provide.clarification";
/// Reserved signal name: external tool results.
pub const SIGNAL_TOOL_RESULTS: &str = "provide.toolresults";
/// Reserved signal name: confirmation decision.
pub const SIGNAL_CONFIRMATION: &str = "provide.confirmation";

/// An operator pause request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PauseRequest {
    /// Why the operator paused the run.
    #[serde(default)]
    pub reason: Option<String>,
}

/// An operator resume request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Optional note merged into the transcript.
    #[serde(default)]
    pub note: Option<String>,
}

/// An answer to a clarification await.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClarificationAnswer {
    /// Correlation id echoed from the await, when the sender included it.
    #[serde(default)]
    pub id: Option<String>,
    /// The answer text.
    #[serde(default)]
    pub answer: String,
}

/// One externally-executed tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidedToolResult {
    /// The declared call this result answers.
    pub call_id: ToolCallId,
    /// Result content.
    #[serde(default)]
    pub content: serde_json::Value,
    /// Whether the external execution failed.
    #[serde(default)]
    pub is_error: bool,
}

/// A batch of externally-executed tool results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolResults {
    /// The results, in any order; the loop reorders by declared call id.
    #[serde(default)]
    pub results: Vec<ProvidedToolResult>,
}

/// A confirmation decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationDecision {
    /// Correlation id echoed from the await, when the sender included it.
    #[serde(default)]
    pub id: Option<String>,
    /// Whether the operator approved.
    #[serde(default)]
    pub approved: bool,
    /// Optional note merged into the transcript.
    #[serde(default)]
    pub note: Option<String>,
}

/// Wraps the run's five signal channels with typed, bounded-wait receives.
///
/// All blocking receives are cancel-safe: workflow cancellation surfaces as
/// [`EngineError::Cancelled`]. Bounded waits return `Ok(None)` on timeout
/// and cancel the paired timer on satisfaction.
pub struct InterruptController {
    pause: Box<dyn SignalChannel>,
    resume: Box<dyn SignalChannel>,
    clarification: Box<dyn SignalChannel>,
    tool_results: Box<dyn SignalChannel>,
    confirmation: Box<dyn SignalChannel>,
}

fn lenient<T: Default + serde::de::DeserializeOwned>(payload: serde_json::Value) -> T {
    serde_json::from_value(payload).unwrap_or_default()
}

impl InterruptController {
    /// Open the reserved channels on a workflow context.
    pub fn new(ctx: &dyn WorkflowContext) -> Self {
        Self {
            pause: ctx.signal_channel(SIGNAL_PAUSE),
            resume: ctx.signal_channel(SIGNAL_RESUME),
            clarification: ctx.signal_channel(SIGNAL_CLARIFICATION),
            tool_results: ctx.signal_channel(SIGNAL_TOOL_RESULTS),
            confirmation: ctx.signal_channel(SIGNAL_CONFIRMATION),
        }
    }

    /// Dequeue a pending pause request without blocking.
    pub fn poll_pause(&mut self) -> Option<PauseRequest> {
        self.pause.poll().map(lenient)
    }

    /// Block until an operator resume arrives.
    pub async fn wait_resume(&mut self) -> Result<ResumeRequest, EngineError> {
        self.resume.receive().await.map(lenient)
    }

    /// Block until an operator resume arrives or the timeout elapses.
    pub async fn wait_resume_with_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ResumeRequest>, EngineError> {
        Ok(self
            .resume
            .receive_with_timeout(timeout)
            .await?
            .map(lenient))
    }

    /// Block until a clarification answer arrives or the timeout elapses.
    /// The boolean is `true` when the wait timed out.
    pub async fn wait_provide_clarification(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<(Option<ClarificationAnswer>, bool), EngineError> {
        match timeout {
            Some(d) => match self.clarification.receive_with_timeout(d).await? {
                Some(payload) => Ok((Some(lenient(payload)), false)),
                None => Ok((None, true)),
            },
            None => Ok((Some(lenient(self.clarification.receive().await?)), false)),
        }
    }

    /// Block until external tool results arrive or the timeout elapses.
    pub async fn wait_provide_tool_results(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<(Option<ExternalToolResults>, bool), EngineError> {
        match timeout {
            Some(d) => match self.tool_results.receive_with_timeout(d).await? {
                Some(payload) => Ok((Some(lenient(payload)), false)),
                None => Ok((None, true)),
            },
            None => Ok((Some(lenient(self.tool_results.receive().await?)), false)),
        }
    }

    /// Block until a confirmation decision arrives or the timeout elapses.
    pub async fn wait_provide_confirmation(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<(Option<ConfirmationDecision>, bool), EngineError> {
        match timeout {
            Some(d) => match self.confirmation.receive_with_timeout(d).await? {
                Some(payload) => Ok((Some(lenient(payload)), false)),
                None => Ok((None, true)),
            },
            None => Ok((Some(lenient(self.confirmation.receive().await?)), false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_decoding_tolerates_bare_objects() {
        let resume: ResumeRequest = lenient(json!({}));
        assert_eq!(resume, ResumeRequest::default());
        let answer: ClarificationAnswer = lenient(json!({"answer": "the second one"}));
        assert_eq!(answer.answer, "the second one");
        assert_eq!(answer.id, None);
        // Entirely malformed payloads fall back to defaults rather than wedge.
        let decision: ConfirmationDecision = lenient(json!("not an object"));
        assert!(!decision.approved);
    }

    #[test]
    fn reserved_names_are_stable() {
        assert_eq!(SIGNAL_PAUSE, "pause");
        assert_eq!(SIGNAL_RESUME, "resume");
        assert_eq!(SIGNAL_CLARIFICATION, "provide.clarification");
        assert_eq!(SIGNAL_TOOL_RESULTS, "provide.toolresults");
        assert_eq!(SIGNAL_CONFIRMATION, "provide.confirmation");
    }
}
