//! Tool specs, toolset registrations, and the registry that resolves
//! planner-requested tool names to their owning toolset.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use axon_engine::WorkflowContext;
use axon_types::{AgentId, ToolError, ToolRequest, ToolResult, ToolsetId};

use crate::codec::{json_codec, ToolCodec};

/// Idempotency policy a tool may opt into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdempotencyMode {
    /// No short-circuiting.
    #[default]
    None,
    /// An identical canonical payload with an earlier successful result in
    /// the same run transcript may be short-circuited.
    Transcript,
}

/// Static description of one tool.
#[derive(Clone)]
pub struct ToolSpec {
    /// Fully-qualified id, globally unique across toolsets (`toolset.tool`).
    pub id: String,
    /// The owning service, for routing and display.
    pub service: String,
    /// The owning toolset.
    pub toolset: ToolsetId,
    /// Unqualified tool name, unique within the toolset.
    pub name: String,
    /// What the tool does, for the planner.
    pub description: String,
    /// Tags the policy allow/deny filter matches against.
    pub tags: Vec<String>,
    /// JSON Schema the stripped payload must satisfy.
    pub payload_schema: serde_json::Value,
    /// Payload codec.
    pub payload_codec: Arc<dyn ToolCodec>,
    /// Result codec.
    pub result_codec: Arc<dyn ToolCodec>,
    /// Template rendered into a human-readable result preview, e.g.
    /// `"answered: {text}"`.
    pub result_hint: Option<String>,
    /// Whether the tool declares artifacts.
    pub declares_artifacts: bool,
    /// Set when this tool runs a nested agent; the target agent id.
    pub agent_tool: Option<AgentId>,
    /// Idempotency policy.
    pub idempotency: IdempotencyMode,
}

impl ToolSpec {
    /// A minimal spec with default codecs and an open payload schema.
    #[must_use]
    pub fn new(toolset: impl Into<ToolsetId>, name: impl Into<String>) -> Self {
        let toolset = toolset.into();
        let name = name.into();
        Self {
            id: format!("{}.{name}", toolset.as_str()),
            service: String::new(),
            toolset,
            name,
            description: String::new(),
            tags: Vec::new(),
            payload_schema: serde_json::json!({"type": "object"}),
            payload_codec: json_codec(),
            result_codec: json_codec(),
            result_hint: None,
            declares_artifacts: false,
            agent_tool: None,
            idempotency: IdempotencyMode::default(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the payload schema.
    #[must_use]
    pub fn with_payload_schema(mut self, schema: serde_json::Value) -> Self {
        self.payload_schema = schema;
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the result-preview template.
    #[must_use]
    pub fn with_result_hint(mut self, hint: impl Into<String>) -> Self {
        self.result_hint = Some(hint.into());
        self
    }

    /// Mark this tool as a nested-agent tool targeting `agent`.
    #[must_use]
    pub fn as_agent_tool(mut self, agent: AgentId) -> Self {
        self.agent_tool = Some(agent);
        self
    }

    /// Set the idempotency mode.
    #[must_use]
    pub fn with_idempotency(mut self, mode: IdempotencyMode) -> Self {
        self.idempotency = mode;
        self
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("id", &self.id)
            .field("toolset", &self.toolset)
            .field("tags", &self.tags)
            .field("agent_tool", &self.agent_tool)
            .finish_non_exhaustive()
    }
}

/// An activity-backed tool executor: runs on a worker queue, may do I/O.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute the tool, returning its raw result value.
    async fn execute(&self, req: ToolRequest) -> Result<serde_json::Value, ToolError>;
}

/// An inline tool executor: runs synchronously inside the calling workflow
/// so nested agent runs share the parent's deterministic history.
#[async_trait]
pub trait InlineToolExecutor: Send + Sync {
    /// Execute the tool within the given workflow context.
    async fn execute_inline(
        &self,
        wf: Arc<dyn WorkflowContext>,
        req: ToolRequest,
    ) -> Result<ToolResult, ToolError>;
}

/// How a toolset's tools execute.
#[derive(Clone)]
pub enum ToolsetBackend {
    /// Scheduled as `execute_tool` activities on the toolset's queue.
    Activity(Arc<dyn ToolExecutor>),
    /// Called synchronously from the workflow.
    Inline(Arc<dyn InlineToolExecutor>),
}

impl ToolsetBackend {
    /// Whether this backend is inline.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

/// Registration of a toolset: specs, execute backend, and routing queue.
#[derive(Clone)]
pub struct ToolsetRegistration {
    /// The toolset id.
    pub name: ToolsetId,
    /// The tools this set owns.
    pub specs: Vec<ToolSpec>,
    /// The execute backend.
    pub backend: ToolsetBackend,
    /// Task queue for activity-backed execution; the agent default applies
    /// when `None`.
    pub queue: Option<String>,
}

/// A registered tool together with its compiled payload validator.
pub(crate) struct RegisteredTool {
    pub(crate) spec: ToolSpec,
    pub(crate) validator: Arc<jsonschema::Validator>,
}

/// Errors from toolset registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The toolset name is taken.
    #[error("toolset already registered: {0}")]
    ToolsetExists(String),
    /// A tool id collides with one from another toolset.
    #[error("tool id already registered: {0}")]
    ToolIdExists(String),
    /// A tool name repeats within the toolset.
    #[error("duplicate tool name in toolset {toolset}: {name}")]
    DuplicateName {
        /// The toolset.
        toolset: String,
        /// The repeated name.
        name: String,
    },
    /// A payload schema failed to compile.
    #[error("invalid payload schema for {tool}: {message}")]
    InvalidSchema {
        /// The tool id.
        tool: String,
        /// The compiler's message.
        message: String,
    },
}

/// Resolves fully-qualified tool names to their registration. Insert-once;
/// reads dominate, so the maps sit behind reader-writer locks.
pub struct ToolsetRegistry {
    toolsets: RwLock<HashMap<ToolsetId, Arc<ToolsetRegistration>>>,
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl ToolsetRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            toolsets: RwLock::new(HashMap::new()),
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a toolset, compiling payload validators for every spec.
    ///
    /// # Errors
    ///
    /// Rejects duplicate toolset names, duplicate tool names within the set,
    /// tool ids that collide globally, and uncompilable schemas. On error,
    /// nothing is registered.
    pub fn register(&self, registration: ToolsetRegistration) -> Result<(), RegistryError> {
        let mut toolsets = self.toolsets.write().expect("toolset map poisoned");
        let mut tools = self.tools.write().expect("tool map poisoned");

        if toolsets.contains_key(&registration.name) {
            return Err(RegistryError::ToolsetExists(registration.name.to_string()));
        }

        let mut staged: Vec<(String, Arc<RegisteredTool>)> = Vec::new();
        let mut names_seen: Vec<&str> = Vec::new();
        for spec in &registration.specs {
            if names_seen.contains(&spec.name.as_str()) {
                return Err(RegistryError::DuplicateName {
                    toolset: registration.name.to_string(),
                    name: spec.name.clone(),
                });
            }
            names_seen.push(&spec.name);
            if tools.contains_key(&spec.id) {
                return Err(RegistryError::ToolIdExists(spec.id.clone()));
            }
            let validator = jsonschema::validator_for(&spec.payload_schema).map_err(|e| {
                RegistryError::InvalidSchema {
                    tool: spec.id.clone(),
                    message: e.to_string(),
                }
            })?;
            staged.push((
                spec.id.clone(),
                Arc::new(RegisteredTool {
                    spec: spec.clone(),
                    validator: Arc::new(validator),
                }),
            ));
        }

        for (id, tool) in staged {
            tools.insert(id, tool);
        }
        toolsets.insert(registration.name.clone(), Arc::new(registration));
        Ok(())
    }

    /// Look up a tool by fully-qualified name, returning the owning
    /// registration and the tool entry.
    pub(crate) fn resolve(
        &self,
        tool_name: &str,
    ) -> Option<(Arc<ToolsetRegistration>, Arc<RegisteredTool>)> {
        let tool = self
            .tools
            .read()
            .expect("tool map poisoned")
            .get(tool_name)
            .cloned()?;
        let toolset = self
            .toolsets
            .read()
            .expect("toolset map poisoned")
            .get(&tool.spec.toolset)
            .cloned()?;
        Some((toolset, tool))
    }

    /// A toolset registration by id.
    #[must_use]
    pub fn toolset(&self, id: &ToolsetId) -> Option<Arc<ToolsetRegistration>> {
        self.toolsets
            .read()
            .expect("toolset map poisoned")
            .get(id)
            .cloned()
    }

    /// The spec for a fully-qualified tool name.
    #[must_use]
    pub fn spec(&self, tool_name: &str) -> Option<ToolSpec> {
        self.tools
            .read()
            .expect("tool map poisoned")
            .get(tool_name)
            .map(|t| t.spec.clone())
    }

    /// All registered specs, for building planner tool listings.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .read()
            .expect("tool map poisoned")
            .values()
            .map(|t| t.spec.clone())
            .collect()
    }
}

impl Default for ToolsetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
