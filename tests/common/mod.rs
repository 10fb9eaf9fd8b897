//! Shared fixtures for the end-to-end run tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use axon::hooks::Subscriber;
use axon::tool::{ToolExecutor, ToolSpec, ToolsetBackend, ToolsetRegistration};
use axon::types::{
    FinalizeReason, HookError, PlanInput, PlanResult, PlanResumeInput, Planner, PlannerContext,
    ProviderFailure, RetryHint, RunEvent, ToolError, ToolRequest,
};

/// A planner that replays a fixed script of plan results.
pub struct ScriptedPlanner {
    steps: Mutex<VecDeque<PlanResult>>,
    /// Finalize reasons observed on resume turns.
    pub finalize_seen: Mutex<Vec<FinalizeReason>>,
    /// Retry hints observed on resume turns.
    pub hints_seen: Mutex<Vec<RetryHint>>,
    /// The run context's attempt counter, per plan turn.
    pub attempts_seen: Mutex<Vec<u32>>,
}

impl ScriptedPlanner {
    pub fn new(steps: Vec<PlanResult>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            finalize_seen: Mutex::new(Vec::new()),
            hints_seen: Mutex::new(Vec::new()),
            attempts_seen: Mutex::new(Vec::new()),
        })
    }

    fn next(&self) -> PlanResult {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| PlanResult::final_text("script exhausted"))
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan_start(
        &self,
        _ctx: PlannerContext,
        input: PlanInput,
    ) -> Result<PlanResult, ProviderFailure> {
        self.attempts_seen.lock().unwrap().push(input.context.attempt);
        Ok(self.next())
    }

    async fn plan_resume(
        &self,
        _ctx: PlannerContext,
        input: PlanResumeInput,
    ) -> Result<PlanResult, ProviderFailure> {
        self.attempts_seen.lock().unwrap().push(input.context.attempt);
        if let Some(reason) = input.finalize {
            self.finalize_seen.lock().unwrap().push(reason);
        }
        if let Some(hint) = input.retry_hint {
            self.hints_seen.lock().unwrap().push(hint);
        }
        Ok(self.next())
    }
}

/// A bus subscriber that records every event it sees.
#[derive(Default)]
pub struct Collector {
    events: Mutex<Vec<RunEvent>>,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events for one run, in emission order.
    pub fn events_for(&self, run_id: &axon::RunId) -> Vec<RunEvent> {
        self.events()
            .into_iter()
            .filter(|e| &e.run_id == run_id)
            .collect()
    }
}

#[async_trait]
impl Subscriber for Collector {
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// The `type` discriminator of each event, in order.
pub fn kinds(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| {
            serde_json::to_value(e).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

/// Pause/resume markers like `pause:human` / `resume:finalize`, in order.
pub fn pause_resume_markers(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| {
            let value = serde_json::to_value(e).unwrap();
            match value["type"].as_str().unwrap() {
                "run_paused" => Some(format!("pause:{}", value["reason"].as_str().unwrap())),
                "run_resumed" => Some(format!("resume:{}", value["reason"].as_str().unwrap())),
                _ => None,
            }
        })
        .collect()
}

/// Invariant 1: every pause is balanced by a resume or by the terminal
/// completion event.
pub fn assert_pause_resume_balanced(events: &[RunEvent]) {
    let mut open = 0u32;
    for event in events {
        let value = serde_json::to_value(event).unwrap();
        match value["type"].as_str().unwrap() {
            "run_paused" => {
                assert_eq!(open, 0, "a run may be paused at most once at a time");
                open += 1;
            }
            "run_resumed" => {
                assert_eq!(open, 1, "resume without a matching pause");
                open -= 1;
            }
            "run_completed" => return,
            _ => {}
        }
    }
    assert_eq!(open, 0, "event stream ended with an unbalanced pause");
}

/// Invariant 2: every scheduled call receives exactly one result with the
/// same call id, after the schedule.
pub fn assert_scheduled_results_match(events: &[RunEvent]) {
    let mut open: Vec<String> = Vec::new();
    for event in events {
        let value = serde_json::to_value(event).unwrap();
        match value["type"].as_str().unwrap() {
            "run_completed" => {
                assert!(open.is_empty(), "scheduled calls without results: {open:?}");
            }
            "tool_call_scheduled" => {
                open.push(value["call_id"].as_str().unwrap().to_string());
            }
            "tool_result_received" => {
                let call_id = value["result"]["call_id"].as_str().unwrap().to_string();
                let position = open
                    .iter()
                    .position(|c| c == &call_id)
                    .unwrap_or_else(|| panic!("result for unscheduled call {call_id}"));
                open.remove(position);
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "scheduled calls without results: {open:?}");
}

/// An activity-backed tool returning a fixed value and counting calls.
pub struct StaticTool {
    pub value: serde_json::Value,
    pub calls: AtomicU32,
    pub delay: Option<std::time::Duration>,
}

impl StaticTool {
    pub fn new(value: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            value,
            calls: AtomicU32::new(0),
            delay: None,
        })
    }

    pub fn slow(value: serde_json::Value, delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            value,
            calls: AtomicU32::new(0),
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl ToolExecutor for StaticTool {
    async fn execute(&self, _req: ToolRequest) -> Result<serde_json::Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.value.clone())
    }
}

/// An activity-backed tool that always fails.
pub struct FailingTool;

#[async_trait]
impl ToolExecutor for FailingTool {
    async fn execute(&self, _req: ToolRequest) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed("the upstream service exploded".into()))
    }
}

/// A single-tool activity toolset with an open object schema.
pub fn toolset(
    name: &str,
    tool: &str,
    executor: Arc<dyn ToolExecutor>,
) -> ToolsetRegistration {
    ToolsetRegistration {
        name: name.into(),
        specs: vec![ToolSpec::new(name, tool)],
        backend: ToolsetBackend::Activity(executor),
        queue: None,
    }
}
