//! The run registry: agent/toolset/model registration and run lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use axon_engine::{
    ActivityDefinition, Engine, RetryPolicy, StartWorkflowRequest, WorkflowDefinition,
    WorkflowHandle,
};
use axon_hooks::{HookBus, Subscriber, Subscription};
use axon_loop::{
    AgentActivities, ClarificationAnswer, ConfirmationDecision, ExternalToolResults, RunMachine,
    RunOutput, WorkflowRunInput, SIGNAL_CLARIFICATION, SIGNAL_CONFIRMATION, SIGNAL_PAUSE,
    SIGNAL_RESUME, SIGNAL_TOOL_RESULTS,
};
use axon_tool::{
    Dispatcher, RegistryError, ToolSpec, ToolsetBackend, ToolsetRegistration, ToolsetRegistry,
};
use axon_types::{
    AgentId, CompletionStatus, HookError, MemoryReader, Message, ModelId, ParentLink, Planner,
    PublicErrorTable, RunContext, RunEvent, RunId, RunPolicy, RunPolicyOverrides, RunStatus,
    SessionId, TurnId, Usage,
};

use crate::agent_tool::AgentToolExecutor;
use crate::stores::{InMemoryMemoryStore, InMemoryRunStore, MemoryStore, PersistenceSubscriber, RunStore};
use crate::tracing_hook::TracingSubscriber;
use crate::workflow::{AgentWorkflowHandler, ExecuteToolActivityHandler, PlanActivityHandler};

/// An externally-provided model client, registered for planner lookup.
/// Must be safe for concurrent use.
pub trait ModelClient: Send + Sync {
    /// The provider name, e.g. `anthropic`.
    fn provider(&self) -> &str;
}

/// Registration of one agent.
#[derive(Clone)]
pub struct AgentRegistration {
    /// The agent id.
    pub id: AgentId,
    /// The planner driving the agent.
    pub planner: Arc<dyn Planner>,
    /// The workflow type name registered on the engine.
    pub workflow_name: String,
    /// Default task queue for the agent's activities.
    pub default_task_queue: String,
    /// The agent's activity names.
    pub activities: AgentActivities,
    /// Default run policy; per-run overrides merge over it.
    pub default_policy: RunPolicy,
    /// Toolsets this agent is expected to use (informational).
    pub toolsets: Vec<axon_types::ToolsetId>,
}

impl AgentRegistration {
    /// A registration with conventional names derived from the agent id.
    #[must_use]
    pub fn new(id: impl Into<AgentId>, planner: Arc<dyn Planner>) -> Self {
        let id = id.into();
        Self {
            workflow_name: format!("{id}.run"),
            default_task_queue: "axon-default".to_string(),
            activities: AgentActivities {
                plan: format!("{id}.plan"),
                execute_tool: format!("{id}.execute_tool"),
            },
            default_policy: RunPolicy::default(),
            toolsets: Vec::new(),
            id,
            planner,
        }
    }

    /// Set the default policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.default_policy = policy;
        self
    }
}

/// Errors from the runtime API.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The agent id is not registered.
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),
    /// A name-scoped registration already exists.
    #[error("already registered: {0}")]
    AlreadyRegistered(String),
    /// The registration is structurally invalid.
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),
    /// The run cannot receive signals.
    #[error("run not awaitable: {kind}")]
    NotAwaitable {
        /// Whether the run completed or was never known.
        kind: NotAwaitableKind,
        /// The engine cause.
        #[source]
        source: axon_engine::EngineError,
    },
    /// Toolset registration failed.
    #[error(transparent)]
    Toolset(#[from] RegistryError),
    /// An engine operation failed.
    #[error(transparent)]
    Engine(#[from] axon_engine::EngineError),
    /// A payload failed to (de)serialize at the runtime boundary.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Why a run cannot receive signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAwaitableKind {
    /// The run already completed.
    CompletedRun,
    /// No run with that id is known.
    UnknownRun,
}

impl std::fmt::Display for NotAwaitableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CompletedRun => write!(f, "completed run"),
            Self::UnknownRun => write!(f, "unknown run"),
        }
    }
}

fn signal_error(e: axon_engine::EngineError) -> RuntimeError {
    match e {
        axon_engine::EngineError::WorkflowCompleted(_) => RuntimeError::NotAwaitable {
            kind: NotAwaitableKind::CompletedRun,
            source: e,
        },
        axon_engine::EngineError::WorkflowNotFound(_) => RuntimeError::NotAwaitable {
            kind: NotAwaitableKind::UnknownRun,
            source: e,
        },
        other => RuntimeError::Engine(other),
    }
}

/// Options for submitting a run.
#[derive(Clone)]
pub struct RunSubmission {
    /// The agent to run.
    pub agent_id: AgentId,
    /// Initial conversation messages.
    pub messages: Vec<Message>,
    /// The session the run belongs to. Required.
    pub session_id: SessionId,
    /// Explicit run id; generated when absent. Must be unique.
    pub run_id: Option<RunId>,
    /// The turn within the session.
    pub turn_id: Option<TurnId>,
    /// Task queue override for the workflow.
    pub task_queue: Option<String>,
    /// Opaque memo attached to the workflow execution.
    pub memo: HashMap<String, serde_json::Value>,
    /// Indexed attributes, where the engine supports them.
    pub search_attributes: HashMap<String, serde_json::Value>,
    /// Labels stamped onto the run context.
    pub labels: HashMap<String, String>,
    /// Per-run policy overrides.
    pub policy: RunPolicyOverrides,
    /// Parent linkage for nested submissions.
    pub parent: Option<ParentLink>,
}

impl RunSubmission {
    /// A submission with required fields only.
    #[must_use]
    pub fn new(
        agent_id: impl Into<AgentId>,
        session_id: impl Into<SessionId>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            messages,
            session_id: session_id.into(),
            run_id: None,
            turn_id: None,
            task_queue: None,
            memo: HashMap::new(),
            search_attributes: HashMap::new(),
            labels: HashMap::new(),
            policy: RunPolicyOverrides::default(),
            parent: None,
        }
    }

    /// Set per-run policy overrides.
    #[must_use]
    pub fn with_policy(mut self, policy: RunPolicyOverrides) -> Self {
        self.policy = policy;
        self
    }

    /// Set an explicit run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Handle to a started run.
pub struct RunHandle {
    run_id: RunId,
    handle: Arc<dyn WorkflowHandle>,
}

impl RunHandle {
    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Wait for the run to finish. Cancellation yields a canceled output
    /// rather than an error.
    ///
    /// # Errors
    ///
    /// Engine failures other than cancellation.
    pub async fn wait(&self) -> Result<RunOutput, RuntimeError> {
        match self.handle.wait().await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| RuntimeError::Serialization(e.to_string())),
            Err(e) if e.is_cancellation() => Ok(RunOutput {
                run_id: self.run_id.clone(),
                status: CompletionStatus::Canceled,
                final_message: None,
                tool_events: Vec::new(),
                notes: Vec::new(),
                usage: Usage::default(),
                public_error: None,
            }),
            Err(e) => Err(RuntimeError::Engine(e)),
        }
    }

    /// Deliver a raw signal to the run.
    ///
    /// # Errors
    ///
    /// Typed not-awaitable errors for completed/unknown runs.
    pub async fn signal(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), RuntimeError> {
        self.handle.signal(name, payload).await.map_err(signal_error)
    }

    /// Request cancellation.
    ///
    /// # Errors
    ///
    /// Engine transport failures.
    pub async fn cancel(&self) -> Result<(), RuntimeError> {
        self.handle.cancel().await.map_err(RuntimeError::Engine)
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) bus: HookBus,
    pub(crate) toolsets: Arc<ToolsetRegistry>,
    pub(crate) machine: Arc<RunMachine>,
    pub(crate) memory: Arc<dyn MemoryStore>,
    pub(crate) memory_reader: Arc<dyn MemoryReader>,
    pub(crate) run_store: Arc<dyn RunStore>,
    agents: RwLock<HashMap<AgentId, Arc<AgentRegistration>>>,
    models: RwLock<HashMap<ModelId, Arc<dyn ModelClient>>>,
    runs: RwLock<HashMap<RunId, Arc<dyn WorkflowHandle>>>,
    scratch: RwLock<HashMap<RunId, Arc<Mutex<HashMap<String, serde_json::Value>>>>>,
    _subscriptions: Vec<Subscription>,
}

impl RuntimeInner {
    pub(crate) fn agent(&self, id: &AgentId) -> Option<Arc<AgentRegistration>> {
        self.agents.read().expect("agent map poisoned").get(id).cloned()
    }

    /// The per-run ephemeral planner state map.
    pub(crate) fn run_scratch(
        &self,
        run_id: &RunId,
    ) -> Arc<Mutex<HashMap<String, serde_json::Value>>> {
        self.scratch
            .write()
            .expect("scratch map poisoned")
            .entry(run_id.clone())
            .or_default()
            .clone()
    }

    pub(crate) fn drop_run_scratch(&self, run_id: &RunId) {
        self.scratch.write().expect("scratch map poisoned").remove(run_id);
    }
}

/// The runtime: process-wide, created explicitly at startup and dropped
/// explicitly at shutdown. All shared state lives behind this value.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// A runtime over an engine with in-memory stores and the default
    /// public-error table.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::builder(engine).build()
    }

    /// Start building a runtime.
    #[must_use]
    pub fn builder(engine: Arc<dyn Engine>) -> RuntimeBuilder {
        RuntimeBuilder {
            engine,
            run_store: None,
            memory: None,
            public_errors: PublicErrorTable::default(),
            trace_events: true,
        }
    }

    /// The hook bus; register subscribers here for streaming and audit.
    #[must_use]
    pub fn bus(&self) -> &HookBus {
        &self.inner.bus
    }

    /// The run store.
    #[must_use]
    pub fn run_store(&self) -> &Arc<dyn RunStore> {
        &self.inner.run_store
    }

    /// The memory store.
    #[must_use]
    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.inner.memory
    }

    /// Register an agent: insert-once, and wires the agent's workflow and
    /// activities into the engine.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AlreadyRegistered`] for duplicate ids,
    /// [`RuntimeError::InvalidRegistration`] for empty activity names.
    pub fn register_agent(&self, registration: AgentRegistration) -> Result<(), RuntimeError> {
        if registration.activities.plan.is_empty() || registration.activities.execute_tool.is_empty()
        {
            return Err(RuntimeError::InvalidRegistration(
                "activity names must be non-empty".to_string(),
            ));
        }
        {
            let mut agents = self.inner.agents.write().expect("agent map poisoned");
            if agents.contains_key(&registration.id) {
                return Err(RuntimeError::AlreadyRegistered(registration.id.to_string()));
            }
            agents.insert(registration.id.clone(), Arc::new(registration.clone()));
        }

        let weak = Arc::downgrade(&self.inner);
        let wired = self
            .inner
            .engine
            .register_workflow(WorkflowDefinition {
                name: registration.workflow_name.clone(),
                default_task_queue: registration.default_task_queue.clone(),
                handler: Arc::new(AgentWorkflowHandler { inner: weak.clone() }),
            })
            .and_then(|()| {
                self.inner.engine.register_activity(ActivityDefinition {
                    name: registration.activities.plan.clone(),
                    queue: registration.default_task_queue.clone(),
                    default_timeout: Duration::from_secs(120),
                    retry_policy: RetryPolicy::default(),
                    handler: Arc::new(PlanActivityHandler {
                        inner: weak.clone(),
                        agent_id: registration.id.clone(),
                        planner: registration.planner.clone(),
                    }),
                })
            })
            .and_then(|()| {
                self.inner.engine.register_activity(ActivityDefinition {
                    name: registration.activities.execute_tool.clone(),
                    queue: registration.default_task_queue.clone(),
                    default_timeout: Duration::from_secs(120),
                    retry_policy: RetryPolicy::default(),
                    handler: Arc::new(ExecuteToolActivityHandler { inner: weak }),
                })
            });
        if let Err(e) = wired {
            self.inner
                .agents
                .write()
                .expect("agent map poisoned")
                .remove(&registration.id);
            return Err(e.into());
        }
        tracing::debug!(agent = %registration.id, "registered agent");
        Ok(())
    }

    /// Register a toolset.
    ///
    /// # Errors
    ///
    /// Propagates registry validation failures.
    pub fn register_toolset(&self, registration: ToolsetRegistration) -> Result<(), RuntimeError> {
        self.inner.toolsets.register(registration)?;
        Ok(())
    }

    /// Register a toolset whose tools run nested agents inline. Every spec
    /// must carry its target agent id.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidRegistration`] when a spec lacks a target.
    pub fn register_agent_toolset(
        &self,
        name: impl Into<axon_types::ToolsetId>,
        specs: Vec<ToolSpec>,
    ) -> Result<(), RuntimeError> {
        for spec in &specs {
            if spec.agent_tool.is_none() {
                return Err(RuntimeError::InvalidRegistration(format!(
                    "{} does not name a target agent",
                    spec.id
                )));
            }
        }
        let registration = ToolsetRegistration {
            name: name.into(),
            specs,
            backend: ToolsetBackend::Inline(Arc::new(AgentToolExecutor {
                inner: Arc::downgrade(&self.inner),
            })),
            queue: None,
        };
        self.register_toolset(registration)
    }

    /// Register a model client: insert-once, name-scoped.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AlreadyRegistered`] for duplicate ids.
    pub fn register_model(
        &self,
        id: impl Into<ModelId>,
        client: Arc<dyn ModelClient>,
    ) -> Result<(), RuntimeError> {
        let id = id.into();
        let mut models = self.inner.models.write().expect("model map poisoned");
        if models.contains_key(&id) {
            return Err(RuntimeError::AlreadyRegistered(id.to_string()));
        }
        models.insert(id, client);
        Ok(())
    }

    /// Look up a registered model client.
    #[must_use]
    pub fn model(&self, id: &ModelId) -> Option<Arc<dyn ModelClient>> {
        self.inner.models.read().expect("model map poisoned").get(id).cloned()
    }

    /// Start a run and return its handle.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownAgent`] when the agent is not registered;
    /// engine start failures otherwise.
    pub async fn start_run(&self, submission: RunSubmission) -> Result<RunHandle, RuntimeError> {
        let agent = self
            .inner
            .agent(&submission.agent_id)
            .ok_or_else(|| RuntimeError::UnknownAgent(submission.agent_id.clone()))?;
        let run_id = submission.run_id.clone().unwrap_or_else(RunId::generate);

        let mut context = RunContext::top_level(
            submission.agent_id.clone(),
            run_id.clone(),
            submission.session_id.clone(),
        );
        context.turn_id = submission.turn_id.clone();
        context.parent = submission.parent.clone();
        context.labels = submission.labels.clone();

        let policy = agent.default_policy.merged(&submission.policy);
        let input = WorkflowRunInput {
            context,
            messages: submission.messages.clone(),
            policy,
            activities: agent.activities.clone(),
            default_task_queue: agent.default_task_queue.clone(),
        };
        let input = serde_json::to_value(input)
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;

        let handle = self
            .inner
            .engine
            .start_workflow(StartWorkflowRequest {
                workflow_id: run_id.to_string(),
                workflow_name: agent.workflow_name.clone(),
                task_queue: submission.task_queue.clone(),
                input,
                memo: submission.memo.clone(),
                search_attributes: submission.search_attributes.clone(),
                retry_policy: None,
            })
            .await?;

        self.inner
            .runs
            .write()
            .expect("run map poisoned")
            .insert(run_id.clone(), handle.clone());
        tracing::debug!(run = %run_id, agent = %submission.agent_id, "started run");
        Ok(RunHandle { run_id, handle })
    }

    /// Start a run and block until it completes.
    ///
    /// # Errors
    ///
    /// As [`Runtime::start_run`] and [`RunHandle::wait`].
    pub async fn run(&self, submission: RunSubmission) -> Result<RunOutput, RuntimeError> {
        self.start_run(submission).await?.wait().await
    }

    /// Deliver a raw signal to a run by id.
    ///
    /// # Errors
    ///
    /// Typed not-awaitable errors for completed/unknown runs.
    pub async fn signal_run(
        &self,
        run_id: &RunId,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), RuntimeError> {
        self.inner
            .engine
            .signal_workflow(run_id.as_str(), name, payload)
            .await
            .map_err(signal_error)
    }

    /// Pause a run.
    ///
    /// # Errors
    ///
    /// As [`Runtime::signal_run`].
    pub async fn pause_run(
        &self,
        run_id: &RunId,
        reason: Option<String>,
    ) -> Result<(), RuntimeError> {
        self.signal_run(run_id, SIGNAL_PAUSE, serde_json::json!({ "reason": reason }))
            .await
    }

    /// Resume a paused run.
    ///
    /// # Errors
    ///
    /// As [`Runtime::signal_run`].
    pub async fn resume_run(
        &self,
        run_id: &RunId,
        note: Option<String>,
    ) -> Result<(), RuntimeError> {
        self.signal_run(run_id, SIGNAL_RESUME, serde_json::json!({ "note": note }))
            .await
    }

    /// Cancel a run.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotAwaitable`] for unknown runs.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<(), RuntimeError> {
        let handle = self
            .inner
            .runs
            .read()
            .expect("run map poisoned")
            .get(run_id)
            .cloned();
        match handle {
            Some(handle) => handle.cancel().await.map_err(RuntimeError::Engine),
            None => Err(RuntimeError::NotAwaitable {
                kind: NotAwaitableKind::UnknownRun,
                source: axon_engine::EngineError::WorkflowNotFound(run_id.to_string()),
            }),
        }
    }

    /// Answer a run's clarification await.
    ///
    /// # Errors
    ///
    /// As [`Runtime::signal_run`].
    pub async fn provide_clarification(
        &self,
        run_id: &RunId,
        answer: ClarificationAnswer,
    ) -> Result<(), RuntimeError> {
        let payload = serde_json::to_value(answer)
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        self.signal_run(run_id, SIGNAL_CLARIFICATION, payload).await
    }

    /// Provide externally-executed tool results to a run.
    ///
    /// # Errors
    ///
    /// As [`Runtime::signal_run`].
    pub async fn provide_tool_results(
        &self,
        run_id: &RunId,
        results: ExternalToolResults,
    ) -> Result<(), RuntimeError> {
        let payload = serde_json::to_value(results)
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        self.signal_run(run_id, SIGNAL_TOOL_RESULTS, payload).await
    }

    /// Answer a run's confirmation await.
    ///
    /// # Errors
    ///
    /// As [`Runtime::signal_run`].
    pub async fn provide_confirmation(
        &self,
        run_id: &RunId,
        decision: ConfirmationDecision,
    ) -> Result<(), RuntimeError> {
        let payload = serde_json::to_value(decision)
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        self.signal_run(run_id, SIGNAL_CONFIRMATION, payload).await
    }

    /// Query a run's status from the engine.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotAwaitable`] for unknown runs.
    pub async fn run_status(&self, run_id: &RunId) -> Result<RunStatus, RuntimeError> {
        self.inner
            .engine
            .query_run_status(run_id.as_str())
            .await
            .map_err(signal_error)
    }

    /// Subscribe a sink to one run's event stream. The subscription closes
    /// itself when the run's terminal event is delivered; the caller may
    /// also close it early.
    pub fn subscribe_run(&self, run_id: &RunId, sink: Arc<dyn Subscriber>) -> Arc<Subscription> {
        let filtered = Arc::new(RunFilteredSubscriber {
            run_id: run_id.clone(),
            sink,
            subscription: OnceLock::new(),
        });
        let subscription = Arc::new(self.inner.bus.register(filtered.clone()));
        let _ = filtered.subscription.set(subscription.clone());
        subscription
    }
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    engine: Arc<dyn Engine>,
    run_store: Option<Arc<dyn RunStore>>,
    memory: Option<(Arc<dyn MemoryStore>, Arc<dyn MemoryReader>)>,
    public_errors: PublicErrorTable,
    trace_events: bool,
}

impl RuntimeBuilder {
    /// Use a custom run store.
    #[must_use]
    pub fn run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    /// Use a custom memory store.
    #[must_use]
    pub fn memory_store<M: MemoryStore + 'static>(mut self, store: Arc<M>) -> Self {
        let writer: Arc<dyn MemoryStore> = store.clone();
        let reader: Arc<dyn MemoryReader> = store;
        self.memory = Some((writer, reader));
        self
    }

    /// Override the public-error message table.
    #[must_use]
    pub fn public_errors(mut self, table: PublicErrorTable) -> Self {
        self.public_errors = table;
        self
    }

    /// Disable the built-in tracing subscriber.
    #[must_use]
    pub fn without_tracing(mut self) -> Self {
        self.trace_events = false;
        self
    }

    /// Build the runtime, installing the persistence (and by default the
    /// tracing) subscribers on the bus.
    #[must_use]
    pub fn build(self) -> Runtime {
        let bus = HookBus::new();
        let toolsets = Arc::new(ToolsetRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(toolsets.clone()));
        let machine = Arc::new(RunMachine::new(
            dispatcher,
            bus.clone(),
            Arc::new(self.public_errors),
        ));
        let run_store = self
            .run_store
            .unwrap_or_else(|| Arc::new(InMemoryRunStore::new()));
        let (memory, memory_reader) = self.memory.unwrap_or_else(|| {
            let store = Arc::new(InMemoryMemoryStore::new());
            let writer: Arc<dyn MemoryStore> = store.clone();
            let reader: Arc<dyn MemoryReader> = store;
            (writer, reader)
        });

        let mut subscriptions =
            vec![bus.register(Arc::new(PersistenceSubscriber::new(run_store.clone())))];
        if self.trace_events {
            subscriptions.push(bus.register(Arc::new(TracingSubscriber::new())));
        }

        Runtime {
            inner: Arc::new(RuntimeInner {
                engine: self.engine,
                bus,
                toolsets,
                machine,
                memory,
                memory_reader,
                run_store,
                agents: RwLock::new(HashMap::new()),
                models: RwLock::new(HashMap::new()),
                runs: RwLock::new(HashMap::new()),
                scratch: RwLock::new(HashMap::new()),
                _subscriptions: subscriptions,
            }),
        }
    }
}

/// Forwards one run's events to a sink and closes itself on the terminal
/// event.
struct RunFilteredSubscriber {
    run_id: RunId,
    sink: Arc<dyn Subscriber>,
    subscription: OnceLock<Arc<Subscription>>,
}

#[async_trait::async_trait]
impl Subscriber for RunFilteredSubscriber {
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError> {
        if event.run_id != self.run_id {
            return Ok(());
        }
        let result = self.sink.on_event(event).await;
        if event.payload.is_terminal()
            && let Some(subscription) = self.subscription.get()
        {
            subscription.close();
        }
        result
    }
}
