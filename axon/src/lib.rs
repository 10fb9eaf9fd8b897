#![doc = include_str!("../README.md")]

pub use axon_engine as engine;
pub use axon_hooks as hooks;
pub use axon_loop as run_loop;
pub use axon_runtime as runtime;
pub use axon_tool as tool;
pub use axon_types as types;

pub use axon_engine::{Engine, EngineError, LocalEngine, WorkflowContext, WorkflowHandle};
pub use axon_hooks::{HookBus, Subscriber, Subscription};
pub use axon_loop::{
    AgentActivities, ClarificationAnswer, ConfirmationDecision, ExternalToolResults,
    InterruptController, ProvidedToolResult, RunMachine, RunOutput, Transcript,
};
pub use axon_runtime::{
    AgentRegistration, ModelClient, RunHandle, RunSubmission, Runtime, RuntimeError,
};
pub use axon_tool::{
    Dispatcher, InlineToolExecutor, ToolCodec, ToolExecutor, ToolSpec, ToolsetBackend,
    ToolsetRegistration, ToolsetRegistry,
};
pub use axon_types::{
    AgentId, AwaitRequest, CompletionStatus, ContentBlock, EventPayload, Message, PlanInput,
    PlanResult, PlanResumeInput, Planner, PlannerContext, ProviderFailure, RetryHint,
    RetryReason, RunContext, RunEvent, RunId, RunPolicy, RunPolicyOverrides, RunStatus,
    SessionId, ToolCall, ToolResult, Usage,
};
