//! Payload shapes crossing the plan-activity boundary.
//!
//! The plan activity always completes with a [`PlanActivityOutput`]: planner
//! failures travel inside it as provider descriptors rather than as activity
//! errors, so the loop — not the engine's retry machinery — decides how a
//! run ends. Events the planner streamed mid-turn ride along and are
//! mirrored onto the hook bus by the loop.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use axon_types::{
    ContentBlock, PlanInput, PlanResult, PlanResumeInput, PlannerEvents, ProviderFailure, Usage,
};

/// Input to the plan activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlanActivityInput {
    /// The first plan turn of a run.
    Start {
        /// The planner input.
        input: PlanInput,
    },
    /// Every later turn.
    Resume {
        /// The planner input.
        input: PlanResumeInput,
    },
}

/// One event the planner streamed during a plan turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamedPlannerEvent {
    /// An incremental chunk of assistant text.
    AssistantChunk {
        /// The chunk.
        text: String,
    },
    /// A thinking or redacted-thinking block.
    Thinking {
        /// The block, verbatim.
        block: ContentBlock,
    },
    /// A free-form planner note.
    Note {
        /// The note.
        note: String,
    },
    /// A token-usage delta.
    Usage {
        /// The delta.
        usage: Usage,
    },
}

/// Output of the plan activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanActivityOutput {
    /// The planner's decision; absent when the planner failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PlanResult>,
    /// The failure descriptor when the planner failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProviderFailure>,
    /// Events streamed mid-turn, in emission order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streamed: Vec<StreamedPlannerEvent>,
}

impl PlanActivityOutput {
    /// Wrap a planner outcome.
    #[must_use]
    pub fn from_outcome(
        outcome: Result<PlanResult, ProviderFailure>,
        streamed: Vec<StreamedPlannerEvent>,
    ) -> Self {
        match outcome {
            Ok(result) => Self {
                result: Some(result),
                failure: None,
                streamed,
            },
            Err(failure) => Self {
                result: None,
                failure: Some(failure),
                streamed,
            },
        }
    }
}

/// A [`PlannerEvents`] sink that buffers everything for the activity output.
#[derive(Default)]
pub struct BufferedPlannerEvents {
    buffer: Mutex<Vec<StreamedPlannerEvent>>,
}

impl BufferedPlannerEvents {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the buffered events in emission order.
    #[must_use]
    pub fn drain(&self) -> Vec<StreamedPlannerEvent> {
        std::mem::take(&mut *self.buffer.lock().expect("planner event buffer poisoned"))
    }
}

impl PlannerEvents for BufferedPlannerEvents {
    fn assistant_chunk(&self, text: &str) {
        self.buffer
            .lock()
            .expect("planner event buffer poisoned")
            .push(StreamedPlannerEvent::AssistantChunk { text: text.to_string() });
    }

    fn thinking_block(&self, block: ContentBlock) {
        self.buffer
            .lock()
            .expect("planner event buffer poisoned")
            .push(StreamedPlannerEvent::Thinking { block });
    }

    fn note(&self, note: &str) {
        self.buffer
            .lock()
            .expect("planner event buffer poisoned")
            .push(StreamedPlannerEvent::Note { note: note.to_string() });
    }

    fn usage(&self, delta: Usage) {
        self.buffer
            .lock()
            .expect("planner event buffer poisoned")
            .push(StreamedPlannerEvent::Usage { usage: delta });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_preserves_emission_order() {
        let sink = BufferedPlannerEvents::new();
        sink.note("first");
        sink.assistant_chunk("he");
        sink.assistant_chunk("llo");
        sink.usage(Usage { input_tokens: 3, output_tokens: 1 });
        let drained = sink.drain();
        assert_eq!(drained.len(), 4);
        assert_eq!(drained[0], StreamedPlannerEvent::Note { note: "first".into() });
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn output_round_trips() {
        let output = PlanActivityOutput::from_outcome(
            Ok(PlanResult::final_text("done")),
            vec![StreamedPlannerEvent::AssistantChunk { text: "done".into() }],
        );
        let json = serde_json::to_value(&output).unwrap();
        let decoded: PlanActivityOutput = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.result, output.result);
        assert_eq!(decoded.streamed, output.streamed);
    }
}
