//! Error types shared across the axon crates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Errors from tool lookup, validation, and execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The requested tool is not registered.
    #[error("tool not found: {0}")]
    NotFound(String),
    /// The payload failed schema validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Tool execution failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The call was rejected by policy.
    #[error("not allowed: {0}")]
    NotAllowed(String),
    /// Execution exceeded the per-tool timeout.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// Execution was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Errors from tool payload/result codecs.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value could not be encoded to canonical bytes.
    #[error("encode failed: {0}")]
    Encode(String),
    /// The bytes could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Errors from hook subscribers.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The subscriber failed to process an event.
    #[error("subscriber failed: {0}")]
    Subscriber(String),
    /// Any other hook error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from run and memory stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The record was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Any other store error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Violations detected by the transcript validator.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TranscriptError {
    /// Two consecutive messages share a role after the opening user message.
    #[error("roles must alternate: message {index} repeats {role}")]
    RolesMustAlternate {
        /// Index of the offending message.
        index: usize,
        /// The repeated role, as text.
        role: String,
    },
    /// Blocks inside an assistant turn are out of order.
    #[error("assistant message {index}: {detail}")]
    AssistantBlockOrder {
        /// Index of the offending message.
        index: usize,
        /// What was out of order.
        detail: String,
    },
    /// A user turn does not answer the preceding assistant tool uses.
    #[error("message {index}: expected {expected} tool results, found {found}")]
    ToolResultCount {
        /// Index of the offending message.
        index: usize,
        /// Declared tool uses.
        expected: usize,
        /// Tool results found.
        found: usize,
    },
    /// A tool result answers the wrong call or is out of order.
    #[error("message {index}: tool result {found} does not match declared use {expected}")]
    ToolResultMismatch {
        /// Index of the offending message.
        index: usize,
        /// The declared tool-use id.
        expected: String,
        /// The id found in the result.
        found: String,
    },
}

/// Classified provider failures, per the model-adapter taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFailureKind {
    /// The provider rate limited the request.
    RateLimited,
    /// The provider is temporarily unavailable.
    Unavailable,
    /// Authentication or authorization failed.
    AuthFailed,
    /// The request was malformed or rejected.
    InvalidRequest,
    /// Anything else.
    Unknown,
}

/// A structured provider-error descriptor, flattened into `run_completed`
/// payloads when a run fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    /// Which provider (or `runtime` for internal failures).
    pub provider: String,
    /// The operation that failed, e.g. `plan_start`.
    pub operation: String,
    /// Classified kind.
    pub kind: ProviderFailureKind,
    /// Provider-assigned error code, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// HTTP status, when the failure crossed an HTTP boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Whether retrying the same request could succeed.
    pub retryable: bool,
    /// Deterministic, user-safe failure string.
    pub public_error: String,
}

impl ProviderFailure {
    /// A descriptor for an internal (non-provider) failure.
    #[must_use]
    pub fn internal(operation: impl Into<String>, public_error: impl Into<String>) -> Self {
        Self {
            provider: "runtime".into(),
            operation: operation.into(),
            kind: ProviderFailureKind::Unknown,
            code: None,
            http_status: None,
            retryable: false,
            public_error: public_error.into(),
        }
    }
}

/// The overridable table of user-safe messages per provider-failure kind.
#[derive(Debug, Clone)]
pub struct PublicErrorTable {
    messages: HashMap<ProviderFailureKind, String>,
}

impl Default for PublicErrorTable {
    fn default() -> Self {
        let mut messages = HashMap::new();
        messages.insert(
            ProviderFailureKind::RateLimited,
            "The model is briefly overloaded. Please retry shortly.".to_string(),
        );
        messages.insert(
            ProviderFailureKind::Unavailable,
            "The model service is temporarily unavailable.".to_string(),
        );
        messages.insert(
            ProviderFailureKind::AuthFailed,
            "The runtime could not authenticate with the model service.".to_string(),
        );
        messages.insert(
            ProviderFailureKind::InvalidRequest,
            "The request could not be processed.".to_string(),
        );
        messages.insert(
            ProviderFailureKind::Unknown,
            "Something went wrong while running the agent.".to_string(),
        );
        Self { messages }
    }
}

impl PublicErrorTable {
    /// The user-safe message for a failure kind.
    #[must_use]
    pub fn message(&self, kind: ProviderFailureKind) -> &str {
        self.messages
            .get(&kind)
            .map(String::as_str)
            .unwrap_or("Something went wrong while running the agent.")
    }

    /// Override the message for a kind.
    pub fn set(&mut self, kind: ProviderFailureKind, message: impl Into<String>) {
        self.messages.insert(kind, message.into());
    }
}
