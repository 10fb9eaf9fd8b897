//! The abstract engine contract.
//!
//! Workflow handlers must reach time, timers, and every nondeterministic
//! operation through [`WorkflowContext`]; activities are the only place
//! permitted to perform external I/O. Signal delivery for a given name is
//! FIFO. Durable ports replay handlers against recorded histories, so a
//! handler that respects this contract is crash-recoverable for free.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use axon_types::RunStatus;

use crate::error::{ActivityError, EngineError};

/// Retry policy for activities and workflow starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_coefficient: f64,
    /// Upper bound on the delay.
    pub max_interval: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Error messages that must not be retried even if marked transient.
    pub non_retryable: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(10),
            max_attempts: 1,
            non_retryable: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// The backoff delay before retry attempt `attempt` (1-based retry index).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_interval.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_interval)
    }
}

/// A handler executing one workflow type.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    /// Run the workflow to completion.
    async fn run(
        &self,
        ctx: Arc<dyn WorkflowContext>,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError>;
}

/// A handler executing one activity type. Activities may perform external
/// I/O and are retried per policy on transient errors.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    /// Execute the activity.
    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ActivityError>;
}

/// Registration of a workflow type.
#[derive(Clone)]
pub struct WorkflowDefinition {
    /// The workflow name.
    pub name: String,
    /// Default task queue for the workflow's activities.
    pub default_task_queue: String,
    /// The handler.
    pub handler: Arc<dyn WorkflowHandler>,
}

/// Registration of an activity type.
#[derive(Clone)]
pub struct ActivityDefinition {
    /// The activity name.
    pub name: String,
    /// The task queue the activity runs on.
    pub queue: String,
    /// Default start-to-close timeout.
    pub default_timeout: Duration,
    /// Default retry policy.
    pub retry_policy: RetryPolicy,
    /// The handler.
    pub handler: Arc<dyn ActivityHandler>,
}

/// A request to start a workflow.
#[derive(Debug, Clone)]
pub struct StartWorkflowRequest {
    /// Unique workflow id within the engine scope.
    pub workflow_id: String,
    /// The registered workflow name to run.
    pub workflow_name: String,
    /// Task queue override; the workflow default applies when `None`.
    pub task_queue: Option<String>,
    /// Workflow input.
    pub input: serde_json::Value,
    /// Opaque memo attached to the execution.
    pub memo: HashMap<String, serde_json::Value>,
    /// Indexed attributes for querying, where the backend supports them.
    pub search_attributes: HashMap<String, serde_json::Value>,
    /// Retry policy for the workflow itself.
    pub retry_policy: Option<RetryPolicy>,
}

impl StartWorkflowRequest {
    /// A minimal request with empty memo and attributes.
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            task_queue: None,
            input,
            memo: HashMap::new(),
            search_attributes: HashMap::new(),
            retry_policy: None,
        }
    }
}

/// One activity invocation from inside a workflow.
#[derive(Debug, Clone)]
pub struct ActivityCall {
    /// The registered activity name.
    pub activity: String,
    /// Activity input.
    pub input: serde_json::Value,
    /// Start-to-close timeout override.
    pub timeout: Option<Duration>,
    /// Retry policy override.
    pub retry_policy: Option<RetryPolicy>,
    /// Task queue override.
    pub task_queue: Option<String>,
}

impl ActivityCall {
    /// A call with engine defaults for timeout, retries, and queue.
    #[must_use]
    pub fn new(activity: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            activity: activity.into(),
            input,
            timeout: None,
            retry_policy: None,
            task_queue: None,
        }
    }

    /// Override the start-to-close timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A typed receiver over one named signal channel. Delivery is FIFO per
/// name; payloads are the raw JSON the signaler sent.
#[async_trait]
pub trait SignalChannel: Send + Sync {
    /// Block until a signal arrives or the workflow is cancelled.
    async fn receive(&mut self) -> Result<serde_json::Value, EngineError>;

    /// Block until a signal arrives, the timeout elapses, or the workflow is
    /// cancelled. Returns `Ok(None)` on timeout. The paired timer is
    /// cancelled when a signal satisfies the receive.
    async fn receive_with_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>, EngineError>;

    /// Dequeue without blocking.
    fn poll(&mut self) -> Option<serde_json::Value>;
}

/// Handle to a started workflow.
#[async_trait]
pub trait WorkflowHandle: Send + Sync + std::fmt::Debug {
    /// The workflow id.
    fn id(&self) -> &str;

    /// Wait for the workflow to reach a terminal state and return its output.
    async fn wait(&self) -> Result<serde_json::Value, EngineError>;

    /// Deliver a signal to the workflow.
    async fn signal(&self, name: &str, payload: serde_json::Value) -> Result<(), EngineError>;

    /// Request cancellation.
    async fn cancel(&self) -> Result<(), EngineError>;
}

/// The deterministic context available inside a workflow handler.
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    /// Deterministic current time. Durable ports return recorded time during
    /// replay; never read the wall clock inside a handler.
    fn now(&self) -> DateTime<Utc>;

    /// A durable timer.
    async fn sleep(&self, duration: Duration);

    /// Execute a registered activity, applying its retry policy.
    async fn execute_activity(&self, call: ActivityCall) -> Result<serde_json::Value, EngineError>;

    /// Start a child workflow sharing this workflow's lifetime.
    async fn start_child_workflow(
        &self,
        req: StartWorkflowRequest,
    ) -> Result<Arc<dyn WorkflowHandle>, EngineError>;

    /// Open the receiver for a named signal channel. Opening the same name
    /// twice drains from the same FIFO queue.
    fn signal_channel(&self, name: &str) -> Box<dyn SignalChannel>;

    /// The workflow's cancellation token.
    fn cancellation(&self) -> CancellationToken;

    /// A child context plus the token that cancels it without cancelling
    /// this workflow. Used to scope in-flight activity futures.
    fn with_cancel(&self) -> (Arc<dyn WorkflowContext>, CancellationToken);

    /// A context detached from this workflow's cancellation, for shutdown
    /// finalizers that must run even while the workflow is being cancelled.
    fn detached(&self) -> Arc<dyn WorkflowContext>;

    /// Suspend until the predicate holds. The predicate must be a pure
    /// function of workflow state.
    async fn await_condition(&self, predicate: Box<dyn Fn() -> bool + Send + Sync>);

    /// Whether cancellation was requested.
    fn is_cancelled(&self) -> bool {
        self.cancellation().is_cancelled()
    }
}

/// The engine: registration, lifecycle, and status queries.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Register a workflow type. Idempotent for identical definitions;
    /// fails when the name is bound to a different handler.
    fn register_workflow(&self, def: WorkflowDefinition) -> Result<(), EngineError>;

    /// Register an activity type. Same idempotency rule as workflows.
    fn register_activity(&self, def: ActivityDefinition) -> Result<(), EngineError>;

    /// Start a workflow.
    async fn start_workflow(
        &self,
        req: StartWorkflowRequest,
    ) -> Result<Arc<dyn WorkflowHandle>, EngineError>;

    /// Deliver a signal to a running workflow by id.
    ///
    /// # Errors
    ///
    /// [`EngineError::WorkflowCompleted`] for terminal workflows,
    /// [`EngineError::WorkflowNotFound`] for unknown ids; transport errors
    /// pass through as [`EngineError::SignalTransport`].
    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError>;

    /// Query the status of a workflow.
    async fn query_run_status(&self, workflow_id: &str) -> Result<RunStatus, EngineError>;
}
