//! Engine and activity error types.

use std::time::Duration;

/// Errors from workflow engine operations.
///
/// Backend-specific cancellation is normalized into [`EngineError::Cancelled`]
/// so upper layers can classify it uniformly via
/// [`EngineError::is_cancellation`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No workflow with the given id exists.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),
    /// The workflow already reached a terminal state.
    #[error("workflow already completed: {0}")]
    WorkflowCompleted(String),
    /// A workflow with this id is already running.
    #[error("workflow already started: {0}")]
    WorkflowAlreadyStarted(String),
    /// The name is already bound to a different handler.
    #[error("already registered: {0}")]
    AlreadyRegistered(String),
    /// The workflow handler itself failed.
    #[error("workflow failed: {0}")]
    WorkflowFailed(String),
    /// An activity exhausted its retry policy or failed terminally.
    #[error("activity {activity} failed: {message}")]
    ActivityFailed {
        /// The activity name.
        activity: String,
        /// The final error message.
        message: String,
        /// Whether the last error was transient.
        retryable: bool,
    },
    /// An activity exceeded its start-to-close timeout.
    #[error("activity {activity} timed out after {timeout:?}")]
    ActivityTimeout {
        /// The activity name.
        activity: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
    /// A signal could not be delivered for transport reasons.
    #[error("signal transport error: {0}")]
    SignalTransport(String),
    /// The workflow (or the operation) was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// Input or output failed to (de)serialize at an engine boundary.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Any other engine error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    /// Whether this error represents cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors raised by activity handlers.
///
/// Transient errors are retried up to the activity's retry policy; terminal
/// errors fail the activity immediately.
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    /// A transient failure worth retrying.
    #[error("transient: {0}")]
    Transient(String),
    /// A terminal failure; retrying cannot help.
    #[error("terminal: {0}")]
    Terminal(String),
}

impl ActivityError {
    /// Whether this error may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The inner message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Terminal(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_classifies() {
        assert!(EngineError::Cancelled.is_cancellation());
        assert!(!EngineError::WorkflowNotFound("w".into()).is_cancellation());
    }

    #[test]
    fn transient_is_retryable() {
        assert!(ActivityError::Transient("busy".into()).is_retryable());
        assert!(!ActivityError::Terminal("bad input".into()).is_retryable());
    }
}
