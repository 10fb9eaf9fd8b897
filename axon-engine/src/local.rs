//! The in-memory engine port.
//!
//! Nondurable: workflows run as plain tokio tasks, `now` is the wall clock,
//! and nothing is journaled or replayed. Signal queues are FIFO per name,
//! activity retries follow the registered policy, and cancellation flows
//! through a [`CancellationToken`] tree. This port backs tests and local
//! development; a durable port wires the same traits to an external
//! workflow service.
//!
//! `Paused` is never reported by this port — pause bookkeeping lives in the
//! run store, which durable backends can additionally reflect in status.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use axon_types::RunStatus;

use crate::engine::{
    ActivityCall, ActivityDefinition, Engine, SignalChannel, StartWorkflowRequest,
    WorkflowContext, WorkflowDefinition, WorkflowHandle,
};
use crate::error::EngineError;

/// Terminal outcome of a local workflow.
#[derive(Debug, Clone)]
enum Terminal {
    Completed(serde_json::Value),
    Failed(String),
    Canceled,
}

/// FIFO queue backing one named signal channel.
#[derive(Debug)]
struct SignalQueue {
    queue: Mutex<VecDeque<serde_json::Value>>,
    notify: Notify,
}

impl SignalQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, payload: serde_json::Value) {
        self.queue.lock().expect("signal queue poisoned").push_back(payload);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<serde_json::Value> {
        self.queue.lock().expect("signal queue poisoned").pop_front()
    }
}

/// Shared state of one local workflow execution.
#[derive(Debug)]
struct RunState {
    id: String,
    status: Mutex<RunStatus>,
    terminal: Mutex<Option<Terminal>>,
    done: Notify,
    cancel: CancellationToken,
    signals: Mutex<HashMap<String, Arc<SignalQueue>>>,
}

impl RunState {
    fn signal_queue(&self, name: &str) -> Arc<SignalQueue> {
        self.signals
            .lock()
            .expect("signal map poisoned")
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SignalQueue::new()))
            .clone()
    }

    fn terminal(&self) -> Option<Terminal> {
        self.terminal.lock().expect("terminal poisoned").clone()
    }

    fn finish(&self, terminal: Terminal) {
        let status = match &terminal {
            Terminal::Completed(_) => RunStatus::Completed,
            Terminal::Failed(_) => RunStatus::Failed,
            Terminal::Canceled => RunStatus::Canceled,
        };
        *self.status.lock().expect("status poisoned") = status;
        *self.terminal.lock().expect("terminal poisoned") = Some(terminal);
        self.done.notify_waiters();
    }
}

struct Inner {
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
    activities: RwLock<HashMap<String, ActivityDefinition>>,
    runs: RwLock<HashMap<String, Arc<RunState>>>,
}

/// The in-memory, nondurable engine port.
#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<Inner>,
}

impl LocalEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                workflows: RwLock::new(HashMap::new()),
                activities: RwLock::new(HashMap::new()),
                runs: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn start_local(
    inner: &Arc<Inner>,
    req: StartWorkflowRequest,
    parent_cancel: Option<&CancellationToken>,
) -> Result<Arc<dyn WorkflowHandle>, EngineError> {
    let def = inner
        .workflows
        .read()
        .expect("workflow map poisoned")
        .get(&req.workflow_name)
        .cloned()
        .ok_or_else(|| EngineError::WorkflowNotFound(req.workflow_name.clone()))?;

    let state = {
        let mut runs = inner.runs.write().expect("run map poisoned");
        if runs.contains_key(&req.workflow_id) {
            return Err(EngineError::WorkflowAlreadyStarted(req.workflow_id));
        }
        let state = Arc::new(RunState {
            id: req.workflow_id.clone(),
            status: Mutex::new(RunStatus::Running),
            terminal: Mutex::new(None),
            done: Notify::new(),
            cancel: parent_cancel
                .map(CancellationToken::child_token)
                .unwrap_or_default(),
            signals: Mutex::new(HashMap::new()),
        });
        runs.insert(req.workflow_id.clone(), state.clone());
        state
    };

    let ctx: Arc<dyn WorkflowContext> = Arc::new(LocalWorkflowContext {
        inner: inner.clone(),
        run: state.clone(),
        cancel: state.cancel.clone(),
    });
    let handler = def.handler.clone();
    let task_state = state.clone();
    let input = req.input;
    tokio::spawn(async move {
        let result = handler.run(ctx, input).await;
        let terminal = if task_state.cancel.is_cancelled() {
            Terminal::Canceled
        } else {
            match result {
                Ok(output) => Terminal::Completed(output),
                Err(e) if e.is_cancellation() => Terminal::Canceled,
                Err(e) => Terminal::Failed(e.to_string()),
            }
        };
        tracing::debug!(workflow_id = %task_state.id, "local workflow finished");
        task_state.finish(terminal);
    });

    Ok(Arc::new(LocalHandle {
        state,
    }))
}

#[async_trait]
impl Engine for LocalEngine {
    fn register_workflow(&self, def: WorkflowDefinition) -> Result<(), EngineError> {
        let mut workflows = self.inner.workflows.write().expect("workflow map poisoned");
        if let Some(existing) = workflows.get(&def.name) {
            if Arc::ptr_eq(&existing.handler, &def.handler) {
                return Ok(());
            }
            return Err(EngineError::AlreadyRegistered(def.name));
        }
        workflows.insert(def.name.clone(), def);
        Ok(())
    }

    fn register_activity(&self, def: ActivityDefinition) -> Result<(), EngineError> {
        let mut activities = self.inner.activities.write().expect("activity map poisoned");
        if let Some(existing) = activities.get(&def.name) {
            if Arc::ptr_eq(&existing.handler, &def.handler) {
                return Ok(());
            }
            return Err(EngineError::AlreadyRegistered(def.name));
        }
        activities.insert(def.name.clone(), def);
        Ok(())
    }

    async fn start_workflow(
        &self,
        req: StartWorkflowRequest,
    ) -> Result<Arc<dyn WorkflowHandle>, EngineError> {
        start_local(&self.inner, req, None)
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        let state = self
            .inner
            .runs
            .read()
            .expect("run map poisoned")
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        if state.terminal().is_some() {
            return Err(EngineError::WorkflowCompleted(workflow_id.to_string()));
        }
        state.signal_queue(name).push(payload);
        Ok(())
    }

    async fn query_run_status(&self, workflow_id: &str) -> Result<RunStatus, EngineError> {
        self.inner
            .runs
            .read()
            .expect("run map poisoned")
            .get(workflow_id)
            .map(|state| *state.status.lock().expect("status poisoned"))
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))
    }
}

#[derive(Debug)]
struct LocalHandle {
    state: Arc<RunState>,
}

#[async_trait]
impl WorkflowHandle for LocalHandle {
    fn id(&self) -> &str {
        &self.state.id
    }

    async fn wait(&self) -> Result<serde_json::Value, EngineError> {
        loop {
            let notified = self.state.done.notified();
            if let Some(terminal) = self.state.terminal() {
                return match terminal {
                    Terminal::Completed(output) => Ok(output),
                    Terminal::Failed(message) => Err(EngineError::WorkflowFailed(message)),
                    Terminal::Canceled => Err(EngineError::Cancelled),
                };
            }
            notified.await;
        }
    }

    async fn signal(&self, name: &str, payload: serde_json::Value) -> Result<(), EngineError> {
        if self.state.terminal().is_some() {
            return Err(EngineError::WorkflowCompleted(self.state.id.clone()));
        }
        self.state.signal_queue(name).push(payload);
        Ok(())
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        self.state.cancel.cancel();
        Ok(())
    }
}

struct LocalWorkflowContext {
    inner: Arc<Inner>,
    run: Arc<RunState>,
    cancel: CancellationToken,
}

#[async_trait]
impl WorkflowContext for LocalWorkflowContext {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = self.cancel.cancelled() => {}
        }
    }

    async fn execute_activity(&self, call: ActivityCall) -> Result<serde_json::Value, EngineError> {
        let def = self
            .inner
            .activities
            .read()
            .expect("activity map poisoned")
            .get(&call.activity)
            .cloned()
            .ok_or_else(|| EngineError::ActivityFailed {
                activity: call.activity.clone(),
                message: "activity not registered".to_string(),
                retryable: false,
            })?;

        let timeout = call.timeout.unwrap_or(def.default_timeout);
        let policy = call.retry_policy.clone().unwrap_or_else(|| def.retry_policy.clone());

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let execution = def.handler.execute(call.input.clone());
            let outcome = tokio::select! {
                result = tokio::time::timeout(timeout, execution) => result,
                () = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            };
            match outcome {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(err)) => {
                    let retryable = err.is_retryable()
                        && !policy.non_retryable.iter().any(|m| err.message().contains(m));
                    if !retryable || attempt >= policy.max_attempts {
                        return Err(EngineError::ActivityFailed {
                            activity: call.activity,
                            message: err.message().to_string(),
                            retryable,
                        });
                    }
                    tracing::debug!(
                        activity = %call.activity,
                        attempt,
                        "retrying transient activity failure"
                    );
                    self.sleep(policy.backoff(attempt)).await;
                }
                Err(_elapsed) => {
                    if attempt >= policy.max_attempts {
                        return Err(EngineError::ActivityTimeout {
                            activity: call.activity,
                            timeout,
                        });
                    }
                    self.sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }

    async fn start_child_workflow(
        &self,
        req: StartWorkflowRequest,
    ) -> Result<Arc<dyn WorkflowHandle>, EngineError> {
        start_local(&self.inner, req, Some(&self.cancel))
    }

    fn signal_channel(&self, name: &str) -> Box<dyn SignalChannel> {
        Box::new(LocalSignalChannel {
            queue: self.run.signal_queue(name),
            cancel: self.cancel.clone(),
        })
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn with_cancel(&self) -> (Arc<dyn WorkflowContext>, CancellationToken) {
        let child = self.cancel.child_token();
        let ctx: Arc<dyn WorkflowContext> = Arc::new(LocalWorkflowContext {
            inner: self.inner.clone(),
            run: self.run.clone(),
            cancel: child.clone(),
        });
        (ctx, child)
    }

    fn detached(&self) -> Arc<dyn WorkflowContext> {
        Arc::new(LocalWorkflowContext {
            inner: self.inner.clone(),
            run: self.run.clone(),
            cancel: CancellationToken::new(),
        })
    }

    async fn await_condition(&self, predicate: Box<dyn Fn() -> bool + Send + Sync>) {
        while !predicate() {
            if self.cancel.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

struct LocalSignalChannel {
    queue: Arc<SignalQueue>,
    cancel: CancellationToken,
}

#[async_trait]
impl SignalChannel for LocalSignalChannel {
    async fn receive(&mut self) -> Result<serde_json::Value, EngineError> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(payload) = self.queue.pop() {
                return Ok(payload);
            }
            tokio::select! {
                () = notified => {}
                () = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            }
        }
    }

    async fn receive_with_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>, EngineError> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    fn poll(&mut self) -> Option<serde_json::Value> {
        self.queue.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ActivityDefinition, RetryPolicy, WorkflowDefinition};
    use crate::error::ActivityError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoWorkflow;

    #[async_trait]
    impl crate::engine::WorkflowHandler for EchoWorkflow {
        async fn run(
            &self,
            _ctx: Arc<dyn WorkflowContext>,
            input: serde_json::Value,
        ) -> Result<serde_json::Value, EngineError> {
            Ok(input)
        }
    }

    struct DrainSignalsWorkflow;

    #[async_trait]
    impl crate::engine::WorkflowHandler for DrainSignalsWorkflow {
        async fn run(
            &self,
            ctx: Arc<dyn WorkflowContext>,
            _input: serde_json::Value,
        ) -> Result<serde_json::Value, EngineError> {
            let mut channel = ctx.signal_channel("numbers");
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(channel.receive().await?);
            }
            Ok(serde_json::Value::Array(seen))
        }
    }

    struct FlakyActivity {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl crate::engine::ActivityHandler for FlakyActivity {
        async fn execute(
            &self,
            _input: serde_json::Value,
        ) -> Result<serde_json::Value, ActivityError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ActivityError::Transient("busy".into()))
            } else {
                Ok(json!({"attempts": n}))
            }
        }
    }

    struct RetryingWorkflow;

    #[async_trait]
    impl crate::engine::WorkflowHandler for RetryingWorkflow {
        async fn run(
            &self,
            ctx: Arc<dyn WorkflowContext>,
            _input: serde_json::Value,
        ) -> Result<serde_json::Value, EngineError> {
            ctx.execute_activity(ActivityCall::new("flaky", json!({})))
                .await
        }
    }

    fn engine_with_echo() -> LocalEngine {
        let engine = LocalEngine::new();
        engine
            .register_workflow(WorkflowDefinition {
                name: "echo".into(),
                default_task_queue: "default".into(),
                handler: Arc::new(EchoWorkflow),
            })
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn start_and_wait_returns_output() {
        let engine = engine_with_echo();
        let handle = engine
            .start_workflow(StartWorkflowRequest::new("w-1", "echo", json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(handle.wait().await.unwrap(), json!({"x": 1}));
        assert_eq!(
            engine.query_run_status("w-1").await.unwrap(),
            RunStatus::Completed
        );
    }

    #[tokio::test]
    async fn duplicate_workflow_id_is_rejected() {
        let engine = engine_with_echo();
        engine
            .start_workflow(StartWorkflowRequest::new("w-1", "echo", json!(null)))
            .await
            .unwrap();
        let err = engine
            .start_workflow(StartWorkflowRequest::new("w-1", "echo", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowAlreadyStarted(_)));
    }

    #[tokio::test]
    async fn signals_are_fifo_per_name() {
        let engine = LocalEngine::new();
        engine
            .register_workflow(WorkflowDefinition {
                name: "drain".into(),
                default_task_queue: "default".into(),
                handler: Arc::new(DrainSignalsWorkflow),
            })
            .unwrap();
        let handle = engine
            .start_workflow(StartWorkflowRequest::new("w-1", "drain", json!(null)))
            .await
            .unwrap();
        for n in 1..=3 {
            handle.signal("numbers", json!(n)).await.unwrap();
        }
        assert_eq!(handle.wait().await.unwrap(), json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn signal_after_completion_is_typed() {
        let engine = engine_with_echo();
        let handle = engine
            .start_workflow(StartWorkflowRequest::new("w-1", "echo", json!(null)))
            .await
            .unwrap();
        handle.wait().await.unwrap();
        let err = handle.signal("anything", json!(null)).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowCompleted(_)));
        let err = engine
            .signal_workflow("w-unknown", "anything", json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn transient_activity_failures_are_retried() {
        let engine = LocalEngine::new();
        engine
            .register_workflow(WorkflowDefinition {
                name: "retrying".into(),
                default_task_queue: "default".into(),
                handler: Arc::new(RetryingWorkflow),
            })
            .unwrap();
        engine
            .register_activity(ActivityDefinition {
                name: "flaky".into(),
                queue: "default".into(),
                default_timeout: Duration::from_secs(5),
                retry_policy: RetryPolicy {
                    initial_interval: Duration::from_millis(1),
                    max_attempts: 5,
                    ..Default::default()
                },
                handler: Arc::new(FlakyActivity {
                    attempts: AtomicU32::new(0),
                }),
            })
            .unwrap();
        let handle = engine
            .start_workflow(StartWorkflowRequest::new("w-1", "retrying", json!(null)))
            .await
            .unwrap();
        assert_eq!(handle.wait().await.unwrap(), json!({"attempts": 3}));
    }

    #[tokio::test]
    async fn registration_is_idempotent_for_identical_defs() {
        let engine = LocalEngine::new();
        let handler: Arc<dyn crate::engine::WorkflowHandler> = Arc::new(EchoWorkflow);
        let def = WorkflowDefinition {
            name: "echo".into(),
            default_task_queue: "default".into(),
            handler: handler.clone(),
        };
        engine.register_workflow(def.clone()).unwrap();
        engine.register_workflow(def).unwrap();
        let err = engine
            .register_workflow(WorkflowDefinition {
                name: "echo".into(),
                default_task_queue: "default".into(),
                handler: Arc::new(EchoWorkflow),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn cancel_surfaces_as_cancelled_wait() {
        struct BlockForever;

        #[async_trait]
        impl crate::engine::WorkflowHandler for BlockForever {
            async fn run(
                &self,
                ctx: Arc<dyn WorkflowContext>,
                _input: serde_json::Value,
            ) -> Result<serde_json::Value, EngineError> {
                let mut channel = ctx.signal_channel("never");
                channel.receive().await
            }
        }

        let engine = LocalEngine::new();
        engine
            .register_workflow(WorkflowDefinition {
                name: "block".into(),
                default_task_queue: "default".into(),
                handler: Arc::new(BlockForever),
            })
            .unwrap();
        let handle = engine
            .start_workflow(StartWorkflowRequest::new("w-1", "block", json!(null)))
            .await
            .unwrap();
        handle.cancel().await.unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(
            engine.query_run_status("w-1").await.unwrap(),
            RunStatus::Canceled
        );
    }

    #[tokio::test]
    async fn receive_with_timeout_returns_none() {
        struct TimeoutWorkflow;

        #[async_trait]
        impl crate::engine::WorkflowHandler for TimeoutWorkflow {
            async fn run(
                &self,
                ctx: Arc<dyn WorkflowContext>,
                _input: serde_json::Value,
            ) -> Result<serde_json::Value, EngineError> {
                let mut channel = ctx.signal_channel("quiet");
                let got = channel
                    .receive_with_timeout(Duration::from_millis(20))
                    .await?;
                Ok(json!({"timed_out": got.is_none()}))
            }
        }

        let engine = LocalEngine::new();
        engine
            .register_workflow(WorkflowDefinition {
                name: "timeout".into(),
                default_task_queue: "default".into(),
                handler: Arc::new(TimeoutWorkflow),
            })
            .unwrap();
        let handle = engine
            .start_workflow(StartWorkflowRequest::new("w-1", "timeout", json!(null)))
            .await
            .unwrap();
        assert_eq!(handle.wait().await.unwrap(), json!({"timed_out": true}));
    }
}
