//! The plan/execute/resume state machine.
//!
//! One [`RunMachine`] drives one run inside a workflow handler:
//!
//! ```text
//! Prompted ─plan─▶ Planning
//! Planning ─final_response─▶ Completed
//! Planning ─tool_calls─▶ ExecutingTools ─all_results─▶ Resuming ─plan─▶ Planning
//! Planning ─await─▶ Paused ─signal─▶ Resuming
//! Paused ─timeout─▶ Finalizing ─plan(finalize)─▶ Completed|Failed
//! Any ─cancel─▶ Canceled    Any ─budget─▶ Finalizing    Any ─fatal─▶ Failed
//! ```
//!
//! Every `RunPaused` is balanced by exactly one `RunResumed` or the terminal
//! `RunCompleted`; every `ToolCallScheduled` receives exactly one
//! `ToolResultReceived` with the same call id, even on cancellation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use axon_engine::{ActivityCall, EngineError, WorkflowContext};
use axon_hooks::HookBus;
use axon_tool::{strip_artifacts, transcript_duplicate, Dispatcher, Prepared, PreparedCall};
use axon_types::{
    AwaitRequest, CapsState, CompletionStatus, ContentBlock, EventPayload, FinalResponse,
    FinalizeReason, Message, MissingFieldsAction, PauseReason, PlanInput, PlanResult,
    PlanResumeInput, ProviderFailure, PublicErrorTable, ResumeReason, RetryHint, RetryReason,
    RunContext, RunEvent, RunId, RunPhase, RunPolicy, ToolCall, ToolFailure, ToolResult, Usage,
};

use crate::activity::{PlanActivityInput, PlanActivityOutput, StreamedPlannerEvent};
use crate::interrupt::InterruptController;
use crate::transcript::Transcript;

/// Names of the activities registered for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivities {
    /// The plan activity.
    pub plan: String,
    /// The execute-tool activity.
    pub execute_tool: String,
}

/// The input handed to the run workflow handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunInput {
    /// The run context.
    pub context: RunContext,
    /// Initial conversation messages.
    pub messages: Vec<Message>,
    /// The merged run policy.
    pub policy: RunPolicy,
    /// Activity names for this agent.
    pub activities: AgentActivities,
    /// Default task queue for tool activities.
    pub default_task_queue: String,
}

/// The output of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// The run id.
    pub run_id: RunId,
    /// Terminal status.
    pub status: CompletionStatus,
    /// The final assistant message, on success.
    pub final_message: Option<Message>,
    /// Every tool result produced by the run, in emission order.
    pub tool_events: Vec<ToolResult>,
    /// Planner notes, in emission order.
    pub notes: Vec<String>,
    /// Accumulated token usage.
    pub usage: Usage,
    /// The user-safe error string, on failure.
    pub public_error: Option<String>,
}

/// The state machine. One instance serves every run of the agents that
/// share its dispatcher and bus; per-run state lives in [`Driver`].
pub struct RunMachine {
    dispatcher: Arc<Dispatcher>,
    bus: HookBus,
    public_errors: Arc<PublicErrorTable>,
}

impl RunMachine {
    /// Create a machine over a dispatcher, bus, and error table.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, bus: HookBus, public_errors: Arc<PublicErrorTable>) -> Self {
        Self {
            dispatcher,
            bus,
            public_errors,
        }
    }

    /// Drive one run to completion inside a workflow handler.
    ///
    /// Returns `Ok` for every terminal run status except cancellation, which
    /// propagates as [`EngineError::Cancelled`] so the engine records the
    /// workflow as canceled. The terminal `run_completed` event is emitted
    /// in every case, with pause/resume balancing preserved.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] on cancellation; other engine errors only
    /// when event emission itself is impossible.
    pub async fn run(
        &self,
        ctx: Arc<dyn WorkflowContext>,
        input: WorkflowRunInput,
    ) -> Result<RunOutput, EngineError> {
        let caps = CapsState::from_policy(&input.policy);
        let started_at = ctx.now();
        let mut driver = Driver {
            machine: self,
            interrupts: InterruptController::new(&*ctx),
            ctx,
            context: input.context,
            policy: input.policy,
            activities: input.activities,
            default_task_queue: input.default_task_queue,
            caps,
            started_at,
            transcript: Transcript::default(),
            paused: None,
            first_turn: true,
            finalize: None,
            carry_hint: None,
            usage: Usage::default(),
            notes: Vec::new(),
            tool_events: Vec::new(),
        };

        driver
            .emit(EventPayload::RunStarted {
                attempt: driver.context.attempt,
            })
            .await;

        match Transcript::new(input.messages) {
            Ok(transcript) => driver.transcript = transcript,
            Err(e) => {
                return Ok(driver
                    .complete_failed(ProviderFailure::internal(
                        "run_start",
                        format!("invalid initial messages: {e}"),
                    ))
                    .await);
            }
        }

        match driver.main_loop().await {
            Ok(output) => Ok(output),
            Err(e) if e.is_cancellation() => {
                if let Some(_reason) = driver.paused.take() {
                    driver
                        .emit(EventPayload::RunResumed {
                            reason: ResumeReason::Canceled,
                        })
                        .await;
                }
                driver
                    .emit(EventPayload::RunCompleted {
                        status: CompletionStatus::Canceled,
                        final_message: None,
                        failure: None,
                    })
                    .await;
                Err(EngineError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(run_id = %driver.context.run_id, error = %e, "run hit an unrecoverable engine error");
                Ok(driver
                    .complete_failed(ProviderFailure::internal("run", e.to_string()))
                    .await)
            }
        }
    }
}

/// Per-run mutable state.
struct Driver<'m> {
    machine: &'m RunMachine,
    ctx: Arc<dyn WorkflowContext>,
    interrupts: InterruptController,
    context: RunContext,
    policy: RunPolicy,
    activities: AgentActivities,
    default_task_queue: String,
    caps: CapsState,
    started_at: chrono::DateTime<chrono::Utc>,
    transcript: Transcript,
    /// The active pause awaiting its balancing resume, if any.
    paused: Option<PauseReason>,
    first_turn: bool,
    finalize: Option<FinalizeReason>,
    carry_hint: Option<RetryHint>,
    usage: Usage,
    notes: Vec<String>,
    tool_events: Vec<ToolResult>,
}

/// A declared tool call and the route it resolved to.
struct Slot {
    call: ToolCall,
    kind: SlotKind,
    agent_tool: bool,
}

enum SlotKind {
    /// The result is already final (policy rejection, validation failure,
    /// transcript idempotency short-circuit).
    Ready(ToolResult),
    Activity(Box<PreparedCall>),
    Inline(Box<PreparedCall>),
}

impl Driver<'_> {
    // --- Event plumbing ---

    /// Publish an event. Subscriber errors are logged and do not fail the
    /// run; persistence subscribers must be idempotent anyway.
    async fn emit(&self, payload: EventPayload) {
        let event = RunEvent::stamp(&self.context, self.ctx.now(), payload);
        if let Err(e) = self.machine.bus.publish(&event).await {
            tracing::warn!(run_id = %self.context.run_id, error = %e, "hook subscriber failed");
        }
    }

    async fn pause(&mut self, reason: PauseReason, detail: Option<String>) {
        self.paused = Some(reason);
        self.emit(EventPayload::RunPaused { reason, detail }).await;
    }

    async fn resume(&mut self, reason: ResumeReason) {
        self.paused = None;
        self.emit(EventPayload::RunResumed { reason }).await;
        // Attempts count monotonically across resumes; the resume event
        // itself still belongs to the attempt it ends.
        self.context = self.context.clone().next_attempt();
    }

    // --- Budget helpers ---

    fn remaining(&self) -> Option<Duration> {
        self.policy.run_time_budget.map(|budget| {
            let elapsed = (self.ctx.now() - self.started_at)
                .to_std()
                .unwrap_or_default();
            budget.saturating_sub(elapsed)
        })
    }

    fn budget_exhausted(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Plan-activity timeout: min(per-plan timeout, remaining budget).
    fn plan_deadline(&self) -> Option<Duration> {
        match (self.policy.plan_timeout, self.remaining()) {
            (Some(per_plan), Some(remaining)) => Some(per_plan.min(remaining)),
            (Some(per_plan), None) => Some(per_plan),
            (None, remaining) => remaining,
        }
    }

    fn refreshed_context(&self) -> RunContext {
        self.context.clone().with_remaining(self.remaining())
    }

    // --- The loop ---

    async fn main_loop(&mut self) -> Result<RunOutput, EngineError> {
        loop {
            // Safe point: drain an operator pause before planning.
            if let Some(pause) = self.interrupts.poll_pause() {
                self.pause(PauseReason::Human, pause.reason).await;
                let resumed = match self.remaining() {
                    Some(remaining) if remaining.is_zero() => None,
                    Some(remaining) => self.interrupts.wait_resume_with_timeout(remaining).await?,
                    None => Some(self.interrupts.wait_resume().await?),
                };
                match resumed {
                    Some(_req) => self.resume(ResumeReason::Operator).await,
                    None => {
                        self.resume(ResumeReason::DeadlineExceeded).await;
                        self.finalize = Some(FinalizeReason::TimeBudget);
                    }
                }
            }

            if self.finalize.is_none() && self.budget_exhausted() {
                self.finalize = Some(FinalizeReason::TimeBudget);
            }
            if let Some(reason) = self.finalize.take() {
                return self.finalizing_turn(reason).await;
            }

            // Plan.
            self.emit(EventPayload::RunPhaseChanged {
                phase: RunPhase::Planning,
            })
            .await;
            let plan_input = if self.first_turn {
                PlanActivityInput::Start {
                    input: PlanInput {
                        context: self.refreshed_context(),
                        messages: self.transcript.messages().to_vec(),
                    },
                }
            } else {
                PlanActivityInput::Resume {
                    input: PlanResumeInput {
                        context: self.refreshed_context(),
                        messages: self.transcript.messages().to_vec(),
                        retry_hint: self.carry_hint.take(),
                        finalize: None,
                    },
                }
            };
            let output = match self.plan_activity(plan_input, self.plan_deadline()).await {
                Ok(output) => output,
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    return Ok(self
                        .complete_failed(plan_engine_failure(&e))
                        .await);
                }
            };
            let thinking = self.mirror_streamed(&output.streamed).await;
            if let Some(failure) = output.failure {
                return Ok(self.complete_failed(failure).await);
            }
            let Some(plan) = output.result else {
                return Ok(self
                    .complete_failed(ProviderFailure::internal(
                        "plan",
                        "planner result malformed",
                    ))
                    .await);
            };
            if let Err(detail) = plan.validate() {
                tracing::debug!(run_id = %self.context.run_id, %detail, "rejecting malformed plan result");
                return Ok(self
                    .complete_failed(ProviderFailure::internal("plan", "planner result malformed"))
                    .await);
            }
            for note in &plan.notes {
                self.notes.push(note.clone());
                self.emit(EventPayload::PlannerNote { note: note.clone() }).await;
                // The plan activity persisted the note to memory.
                self.emit(EventPayload::MemoryAppended { note: note.clone() }).await;
            }
            self.first_turn = false;

            if let Some(final_response) = plan.final_response.clone() {
                return Ok(self
                    .complete_success(final_response, plan.streamed, thinking)
                    .await);
            }

            if let Some(await_) = plan.await_.clone() {
                self.handle_await(await_, thinking).await?;
                continue;
            }

            if let Some(output) = self.execute_turn_tools(plan, thinking).await? {
                return Ok(output);
            }
            self.emit(EventPayload::RunPhaseChanged {
                phase: RunPhase::Resuming,
            })
            .await;
        }
    }

    // --- Plan activity ---

    async fn plan_activity(
        &self,
        input: PlanActivityInput,
        timeout: Option<Duration>,
    ) -> Result<PlanActivityOutput, EngineError> {
        let payload = serde_json::to_value(&input)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let mut call = ActivityCall::new(self.activities.plan.clone(), payload);
        if let Some(timeout) = timeout {
            call = call.with_timeout(timeout);
        }
        let raw = self.ctx.execute_activity(call).await?;
        serde_json::from_value(raw).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Mirror streamed planner events to the bus; returns the thinking
    /// blocks for the transcript.
    async fn mirror_streamed(&mut self, streamed: &[StreamedPlannerEvent]) -> Vec<ContentBlock> {
        let mut thinking = Vec::new();
        for event in streamed {
            match event {
                StreamedPlannerEvent::AssistantChunk { .. } => {
                    // Chunks feed stream sinks via the final assistant
                    // message; nothing to mirror per chunk.
                }
                StreamedPlannerEvent::Thinking { block } => {
                    self.emit(EventPayload::ThinkingBlock {
                        block: block.clone(),
                    })
                    .await;
                    thinking.push(block.clone());
                }
                StreamedPlannerEvent::Note { note } => {
                    self.notes.push(note.clone());
                    self.emit(EventPayload::PlannerNote { note: note.clone() }).await;
                }
                StreamedPlannerEvent::Usage { usage } => {
                    self.usage.add(usage);
                    self.emit(EventPayload::Usage { usage: *usage }).await;
                }
            }
        }
        thinking
    }

    // --- Terminals ---

    async fn complete_success(
        &mut self,
        final_response: FinalResponse,
        streamed: bool,
        thinking: Vec<ContentBlock>,
    ) -> RunOutput {
        let mut message = final_response.message;
        if !thinking.is_empty() {
            let mut content = thinking;
            content.extend(message.content);
            message.content = content;
        }
        if let Err(e) = self.transcript.push_assistant(message.clone()) {
            return self
                .complete_failed(ProviderFailure::internal(
                    "plan",
                    format!("final response violates transcript shape: {e}"),
                ))
                .await;
        }
        if !streamed {
            self.emit(EventPayload::AssistantMessage {
                message: message.clone(),
            })
            .await;
        }
        self.emit(EventPayload::RunPhaseChanged {
            phase: RunPhase::Completed,
        })
        .await;
        self.emit(EventPayload::RunCompleted {
            status: CompletionStatus::Success,
            final_message: Some(message.clone()),
            failure: None,
        })
        .await;
        RunOutput {
            run_id: self.context.run_id.clone(),
            status: CompletionStatus::Success,
            final_message: Some(message),
            tool_events: std::mem::take(&mut self.tool_events),
            notes: std::mem::take(&mut self.notes),
            usage: self.usage,
            public_error: None,
        }
    }

    async fn complete_failed(&mut self, mut failure: ProviderFailure) -> RunOutput {
        if failure.public_error.is_empty() {
            failure.public_error = self
                .machine
                .public_errors
                .message(failure.kind)
                .to_string();
        }
        if self.paused.take().is_some() {
            self.emit(EventPayload::RunResumed {
                reason: ResumeReason::Finalize,
            })
            .await;
        }
        self.emit(EventPayload::RunPhaseChanged {
            phase: RunPhase::Completed,
        })
        .await;
        self.emit(EventPayload::RunCompleted {
            status: CompletionStatus::Failed,
            final_message: None,
            failure: Some(failure.clone()),
        })
        .await;
        RunOutput {
            run_id: self.context.run_id.clone(),
            status: CompletionStatus::Failed,
            final_message: None,
            tool_events: std::mem::take(&mut self.tool_events),
            notes: std::mem::take(&mut self.notes),
            usage: self.usage,
            public_error: Some(failure.public_error),
        }
    }

    /// Drive the terminal plan turn after a budget or cap trip.
    async fn finalizing_turn(&mut self, reason: FinalizeReason) -> Result<RunOutput, EngineError> {
        self.emit(EventPayload::RunPhaseChanged {
            phase: RunPhase::Finalizing,
        })
        .await;
        let bracket = reason == FinalizeReason::TimeBudget;
        if bracket {
            self.pause(PauseReason::Finalize, None).await;
        }
        let input = PlanActivityInput::Resume {
            input: PlanResumeInput {
                context: self.refreshed_context(),
                messages: self.transcript.messages().to_vec(),
                retry_hint: self.carry_hint.take(),
                finalize: Some(reason),
            },
        };
        let output = match self.plan_activity(input, self.policy.plan_timeout).await {
            Ok(output) => output,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                if bracket {
                    self.resume(ResumeReason::Finalize).await;
                }
                return Ok(self.complete_failed(plan_engine_failure(&e)).await);
            }
        };
        if bracket {
            self.resume(ResumeReason::Finalize).await;
        }
        let thinking = self.mirror_streamed(&output.streamed).await;
        if let Some(failure) = output.failure {
            return Ok(self.complete_failed(failure).await);
        }
        match output.result {
            Some(plan) if plan.final_response.is_some() => {
                let final_response = plan.final_response.expect("checked above");
                Ok(self
                    .complete_success(final_response, plan.streamed, thinking)
                    .await)
            }
            _ => Ok(self
                .complete_failed(ProviderFailure::internal(
                    "plan_finalize",
                    "planner result malformed",
                ))
                .await),
        }
    }

    // --- Awaits ---

    async fn handle_await(
        &mut self,
        await_: AwaitRequest,
        thinking: Vec<ContentBlock>,
    ) -> Result<(), EngineError> {
        match await_ {
            AwaitRequest::Clarification { id, question } => {
                if !self.policy.interrupts_allowed {
                    self.deny_await("clarification").await;
                    return Ok(());
                }
                if let Err(e) = self
                    .transcript
                    .push_assistant_turn(thinking, Some(question.clone()), vec![])
                {
                    tracing::warn!(run_id = %self.context.run_id, error = %e, "await question rejected by transcript");
                }
                self.emit(EventPayload::AwaitClarification {
                    id: id.clone(),
                    question,
                })
                .await;
                self.pause(PauseReason::AwaitClarification, None).await;
                let (answer, timed_out) = self
                    .interrupts
                    .wait_provide_clarification(self.remaining())
                    .await?;
                if timed_out {
                    self.resume(ResumeReason::ClarificationTimeout).await;
                    let _ = self
                        .transcript
                        .push_user_text("No clarification was provided before the deadline.");
                    self.finalize = Some(FinalizeReason::TimeBudget);
                } else if let Some(answer) = answer {
                    let _ = self.transcript.push_user_text(answer.answer);
                    self.resume(ResumeReason::Clarification).await;
                }
            }
            AwaitRequest::Confirmation {
                id,
                prompt,
                tool_call_id,
                tool_name,
            } => {
                if !self.policy.interrupts_allowed {
                    self.deny_await("confirmation").await;
                    return Ok(());
                }
                if let Err(e) = self
                    .transcript
                    .push_assistant_turn(thinking, Some(prompt.clone()), vec![])
                {
                    tracing::warn!(run_id = %self.context.run_id, error = %e, "await prompt rejected by transcript");
                }
                self.emit(EventPayload::AwaitConfirmation {
                    id: id.clone(),
                    prompt,
                })
                .await;
                self.pause(PauseReason::AwaitConfirmation, None).await;
                let (decision, timed_out) = self
                    .interrupts
                    .wait_provide_confirmation(self.remaining())
                    .await?;
                if timed_out {
                    self.resume(ResumeReason::ConfirmationTimeout).await;
                    let _ = self
                        .transcript
                        .push_user_text("No confirmation was provided before the deadline.");
                    self.finalize = Some(FinalizeReason::TimeBudget);
                } else if let Some(decision) = decision {
                    if let Some(call_id) = tool_call_id {
                        self.emit(EventPayload::ToolAuthorization {
                            call_id,
                            tool_name: tool_name.unwrap_or_default(),
                            authorized: decision.approved,
                        })
                        .await;
                    }
                    let mut text = if decision.approved {
                        "Confirmed.".to_string()
                    } else {
                        "Denied.".to_string()
                    };
                    if let Some(note) = decision.note {
                        text.push(' ');
                        text.push_str(&note);
                    }
                    let _ = self.transcript.push_user_text(text);
                    self.resume(ResumeReason::Confirmation).await;
                }
            }
            AwaitRequest::ExternalTools { calls } => {
                let uses: Vec<ContentBlock> = calls
                    .iter()
                    .map(|call| ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.payload.clone(),
                    })
                    .collect();
                if let Err(e) = self.transcript.push_assistant_turn(thinking, None, uses) {
                    tracing::warn!(run_id = %self.context.run_id, error = %e, "external tool uses rejected by transcript");
                }
                self.emit(EventPayload::AwaitExternalTools {
                    call_ids: calls.iter().map(|c| c.id.clone()).collect(),
                })
                .await;
                self.pause(PauseReason::AwaitExternalTools, None).await;
                let (provided, timed_out) = self
                    .interrupts
                    .wait_provide_tool_results(self.remaining())
                    .await?;
                let mut results = Vec::with_capacity(calls.len());
                let provided = provided.map(|p| p.results).unwrap_or_default();
                for call in &calls {
                    let result = provided.iter().find(|r| r.call_id == call.id);
                    results.push(match result {
                        Some(r) if !r.is_error => {
                            ToolResult::success(call.name.clone(), call.id.clone(), r.content.clone())
                        }
                        Some(r) => ToolResult::error(
                            call.name.clone(),
                            call.id.clone(),
                            ToolFailure::new(
                                r.content
                                    .as_str()
                                    .unwrap_or("external execution failed")
                                    .to_string(),
                            ),
                            None,
                        ),
                        None => ToolResult::error(
                            call.name.clone(),
                            call.id.clone(),
                            ToolFailure::new(if timed_out {
                                "no result was provided before the deadline"
                            } else {
                                "no result was provided for this call"
                            }),
                            None,
                        ),
                    });
                }
                if let Err(e) = self.transcript.push_tool_results(&results) {
                    tracing::warn!(run_id = %self.context.run_id, error = %e, "provided tool results rejected by transcript");
                }
                self.tool_events.extend(results);
                if timed_out {
                    self.resume(ResumeReason::ToolResultsTimeout).await;
                    self.finalize = Some(FinalizeReason::TimeBudget);
                } else {
                    self.resume(ResumeReason::ToolResults).await;
                }
            }
        }
        Ok(())
    }

    /// Reject an await disallowed by policy: hint the planner and continue.
    async fn deny_await(&mut self, kind: &str) {
        let hint = RetryHint::new(
            RetryReason::InvalidArguments,
            format!("{kind} awaits are not allowed for this run (interrupts disabled)"),
        );
        self.emit(EventPayload::RetryHintIssued { hint: hint.clone() }).await;
        self.carry_hint = Some(hint);
    }

    // --- Tool batches ---

    async fn execute_turn_tools(
        &mut self,
        plan: PlanResult,
        thinking: Vec<ContentBlock>,
    ) -> Result<Option<RunOutput>, EngineError> {
        let mut calls = plan.tool_calls;

        // Per-turn cap: trim and hint.
        if let Some(cap) = self.policy.per_turn_max_tool_calls
            && calls.len() as u32 > cap
        {
            calls.truncate(cap as usize);
            let hint = RetryHint::new(
                RetryReason::PerTurnCap,
                format!("tool calls were trimmed to the per-turn cap of {cap}"),
            );
            self.emit(EventPayload::RetryHintIssued { hint: hint.clone() }).await;
            self.carry_hint = Some(hint);
        }

        // Run-level cap: never execute more calls than the budget grants.
        let granted = self.caps.take_tool_calls(calls.len() as u32) as usize;
        if granted == 0 && !calls.is_empty() {
            let hint = RetryHint::new(
                RetryReason::PerTurnCap,
                "the run's tool-call budget is exhausted",
            );
            self.emit(EventPayload::RetryHintIssued { hint: hint.clone() }).await;
            self.carry_hint = Some(hint);
            self.finalize = Some(FinalizeReason::ToolCallCap);
            return Ok(None);
        }
        calls.truncate(granted);

        self.emit(EventPayload::RunPhaseChanged {
            phase: RunPhase::ExecutingTools,
        })
        .await;

        // Resolve each declared call to its route, applying policy first.
        let mut slots: Vec<Slot> = Vec::with_capacity(calls.len());
        for call in &calls {
            let spec = self.machine.dispatcher.registry().spec(&call.name);
            let denial = if !self.policy.permits_tool(&call.name) {
                Some(format!(
                    "policy restricts this run to {}",
                    self.policy.restrict_to_tool.as_deref().unwrap_or("<unset>")
                ))
            } else if let Some(spec) = &spec
                && !self.policy.permits_tags(&spec.tags)
            {
                Some("tool tags are not permitted by policy".to_string())
            } else {
                None
            };
            let agent_tool = spec.as_ref().is_some_and(|s| s.agent_tool.is_some());
            let kind = if let Some(reason) = denial {
                self.emit(EventPayload::PolicyDecision {
                    tool_name: call.name.clone(),
                    allowed: false,
                    reason: Some(reason.clone()),
                })
                .await;
                SlotKind::Ready(ToolResult::error(
                    call.name.clone(),
                    call.id.clone(),
                    ToolFailure::new(reason.clone()),
                    Some(RetryHint::new(RetryReason::ToolUnavailable, reason)),
                ))
            } else {
                match self.machine.dispatcher.prepare(call) {
                    Prepared::Rejected(result) => SlotKind::Ready(*result),
                    Prepared::Activity(prepared) => self.short_circuit_or(*prepared, false),
                    Prepared::Inline(prepared) => self.short_circuit_or(*prepared, true),
                }
            };
            slots.push(Slot {
                call: call.clone(),
                kind,
                agent_tool,
            });
        }

        // Declare the turn's tool uses in planner order.
        let uses: Vec<ContentBlock> = calls
            .iter()
            .map(|call| ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.payload.clone(),
            })
            .collect();
        if let Err(e) = self.transcript.push_assistant_turn(thinking, None, uses) {
            return Ok(Some(
                self.complete_failed(ProviderFailure::internal(
                    "execute_tools",
                    format!("tool declarations violate transcript shape: {e}"),
                ))
                .await,
            ));
        }

        for slot in &slots {
            let artifacts = match &slot.kind {
                SlotKind::Activity(p) | SlotKind::Inline(p) => p.artifacts,
                SlotKind::Ready(_) => strip_artifacts(&slot.call.payload).1,
            };
            self.emit(EventPayload::ToolCallScheduled {
                call_id: slot.call.id.clone(),
                tool_name: slot.call.name.clone(),
                artifacts,
            })
            .await;
            // Expected-children bump for agent-tool calls the planner
            // declared child counts for.
            if slot.agent_tool && plan.expected_children > 0 {
                self.emit(EventPayload::ToolCallUpdated {
                    call_id: slot.call.id.clone(),
                    expected_children: plan.expected_children,
                })
                .await;
            }
        }

        // Launch activity-backed calls in order; await in order.
        let ctx = self.ctx.clone();
        let activity_futures: Vec<_> = slots
            .iter()
            .filter_map(|slot| match &slot.kind {
                SlotKind::Activity(prepared) => {
                    let call = self.activity_call(prepared);
                    let ctx = ctx.clone();
                    Some(async move { ctx.execute_activity(call?).await })
                }
                _ => None,
            })
            .collect();
        let mut activity_results = futures::future::join_all(activity_futures)
            .await
            .into_iter();

        // Collect results in planner-declared order; inline calls run
        // sequentially here to keep nested histories deterministic.
        let mut results: Vec<ToolResult> = Vec::with_capacity(slots.len());
        for slot in &slots {
            let result = match &slot.kind {
                SlotKind::Ready(result) => result.clone(),
                SlotKind::Activity(prepared) => {
                    let raw = activity_results.next().expect("one result per launched future");
                    self.machine.dispatcher.finish(prepared, raw)
                }
                SlotKind::Inline(prepared) => self.execute_inline(prepared).await,
            };
            results.push(result);
        }

        // Emit, count failures, and apply per-result policy in order.
        let mut executed_agent_tools: u32 = 0;
        let mut children_total: u32 = 0;
        let mut await_clarification: Option<RetryHint> = None;
        for (slot, result) in slots.iter().zip(&results) {
            if slot.agent_tool {
                executed_agent_tools += 1;
                children_total += result.children;
            }
            self.emit(EventPayload::ToolResultReceived {
                result: result.clone(),
            })
            .await;
            if let Some(hint) = &result.retry_hint {
                self.emit(EventPayload::RetryHintIssued { hint: hint.clone() }).await;
                self.carry_hint = Some(hint.clone());
                if hint.reason == RetryReason::MissingFields {
                    match self.policy.on_missing_fields {
                        MissingFieldsAction::Resume => {}
                        MissingFieldsAction::Finalize => {
                            self.finalize = Some(FinalizeReason::MissingFields);
                        }
                        MissingFieldsAction::AwaitClarification => {
                            if self.policy.interrupts_allowed {
                                await_clarification = Some(hint.clone());
                            } else {
                                self.finalize = Some(FinalizeReason::MissingFields);
                            }
                        }
                    }
                }
            }
            let streak = self.caps.record_outcome(result.is_error());
            if let Some(cap) = self.policy.run_max_consecutive_failed_tool_calls
                && streak >= cap
                && self.finalize.is_none()
            {
                if result.retry_hint.is_none() {
                    let hint = RetryHint::new(
                        RetryReason::FailureCap,
                        format!("{streak} consecutive tool calls failed"),
                    );
                    self.emit(EventPayload::RetryHintIssued { hint: hint.clone() }).await;
                    self.carry_hint = Some(hint);
                }
                self.finalize = Some(FinalizeReason::FailureCap);
            }
        }

        if let Err(e) = self.transcript.push_tool_results(&results) {
            return Ok(Some(
                self.complete_failed(ProviderFailure::internal(
                    "execute_tools",
                    format!("tool results violate transcript shape: {e}"),
                ))
                .await,
            ));
        }
        self.tool_events.extend(results);

        if self.ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Hard protection: agent-as-tool calls that spawned no children
        // terminate the run instead of resuming.
        if executed_agent_tools > 0 && children_total == 0 {
            self.emit(EventPayload::HardProtectionTriggered {
                reason: "agent_tool_no_children".to_string(),
                executed_agent_tools,
                children_total,
            })
            .await;
            return Ok(Some(
                self.complete_failed(ProviderFailure::internal(
                    "execute_tools",
                    "agent tools produced no children",
                ))
                .await,
            ));
        }

        if let Some(hint) = await_clarification
            && self.finalize.is_none()
        {
            let call_hint = AwaitRequest::Clarification {
                id: format!("missing-fields-{}", self.context.run_id),
                question: hint.message,
            };
            self.handle_await(call_hint, Vec::new()).await?;
        }

        Ok(None)
    }

    /// Apply transcript idempotency, short-circuiting duplicate calls.
    fn short_circuit_or(&self, prepared: PreparedCall, inline: bool) -> SlotKind {
        if prepared.spec.idempotency == axon_tool::IdempotencyMode::Transcript
            && let Some(prior) = transcript_duplicate(
                self.transcript.messages(),
                &prepared.tool_name,
                &prepared.payload_bytes,
                &prepared.spec,
            )
        {
            tracing::debug!(tool = %prepared.tool_name, "short-circuiting duplicate transcript call");
            return SlotKind::Ready(ToolResult::success(
                prepared.tool_name,
                prepared.call_id,
                prior,
            ));
        }
        if inline {
            SlotKind::Inline(Box::new(prepared))
        } else {
            SlotKind::Activity(Box::new(prepared))
        }
    }

    fn activity_call(&self, prepared: &PreparedCall) -> Result<ActivityCall, EngineError> {
        let request = axon_types::ToolRequest {
            run_id: self.context.run_id.clone(),
            agent_id: self.context.agent_id.clone(),
            toolset: prepared.spec.toolset.clone(),
            tool: prepared.spec.name.clone(),
            call_id: prepared.call_id.clone(),
            payload: prepared.payload.clone(),
            artifacts: prepared.artifacts,
            session_id: self.context.session_id.clone(),
            turn_id: self.context.turn_id.clone(),
            parent_tool_call_id: self.context.parent.as_ref().map(|p| p.tool_call_id.clone()),
        };
        let payload = serde_json::to_value(&request)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let mut call = ActivityCall::new(self.activities.execute_tool.clone(), payload);
        if let Some(timeout) = self.policy.per_tool_timeout {
            call = call.with_timeout(timeout);
        }
        call.task_queue = prepared
            .toolset
            .queue
            .clone()
            .or_else(|| Some(self.default_task_queue.clone()));
        Ok(call)
    }

    async fn execute_inline(&self, prepared: &PreparedCall) -> ToolResult {
        let axon_tool::ToolsetBackend::Inline(executor) = &prepared.toolset.backend else {
            return ToolResult::error(
                prepared.tool_name.clone(),
                prepared.call_id.clone(),
                ToolFailure::new("toolset backend is not inline"),
                None,
            );
        };
        let request = axon_types::ToolRequest {
            run_id: self.context.run_id.clone(),
            agent_id: self.context.agent_id.clone(),
            toolset: prepared.spec.toolset.clone(),
            tool: prepared.spec.name.clone(),
            call_id: prepared.call_id.clone(),
            payload: prepared.payload.clone(),
            artifacts: prepared.artifacts,
            session_id: self.context.session_id.clone(),
            turn_id: self.context.turn_id.clone(),
            parent_tool_call_id: self.context.parent.as_ref().map(|p| p.tool_call_id.clone()),
        };
        match executor.execute_inline(self.ctx.clone(), request).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(
                prepared.tool_name.clone(),
                prepared.call_id.clone(),
                ToolFailure::from_error(&e),
                None,
            ),
        }
    }
}

/// Map an engine-level plan failure into a provider descriptor.
fn plan_engine_failure(err: &EngineError) -> ProviderFailure {
    let kind = match err {
        EngineError::ActivityTimeout { .. } => axon_types::ProviderFailureKind::Unavailable,
        EngineError::ActivityFailed { retryable: true, .. } => {
            axon_types::ProviderFailureKind::Unavailable
        }
        _ => axon_types::ProviderFailureKind::Unknown,
    };
    ProviderFailure {
        provider: "runtime".to_string(),
        operation: "plan".to_string(),
        kind,
        code: None,
        http_status: None,
        retryable: matches!(
            err,
            EngineError::ActivityTimeout { .. } | EngineError::ActivityFailed { retryable: true, .. }
        ),
        public_error: String::new(),
    }
}
