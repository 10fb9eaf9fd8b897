//! Persisted record shapes for runs, events, and agent memory.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AgentId, RunId, SessionId, TurnId};

/// Status of a run as reported by stores and engine queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted but not yet executing.
    Pending,
    /// Executing.
    Running,
    /// Blocked on an await or operator pause.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with a terminal failure.
    Failed,
    /// Canceled.
    Canceled,
}

impl RunStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// The persisted run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// The agent.
    pub agent_id: AgentId,
    /// The run.
    pub run_id: RunId,
    /// The session.
    pub session_id: SessionId,
    /// The turn, when known.
    pub turn_id: Option<TurnId>,
    /// Current status.
    pub status: RunStatus,
    /// When the run started. Preserved across upserts.
    pub started_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Caller-attached labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One entry in the persisted event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// The event's `type` discriminator.
    pub event_type: String,
    /// The run.
    pub run_id: RunId,
    /// The agent.
    pub agent_id: AgentId,
    /// The session.
    pub session_id: SessionId,
    /// The turn, when known.
    pub turn_id: Option<TurnId>,
    /// The full encoded event.
    pub payload_json: serde_json::Value,
    /// Monotonic sequence number within the run, assigned by the store.
    pub monotonic_seq: u64,
}

/// One note in an agent's memory stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// The session the note belongs to.
    pub session_id: SessionId,
    /// The agent the note belongs to.
    pub agent_id: AgentId,
    /// The note.
    pub note: String,
    /// When the note was appended.
    pub at: DateTime<Utc>,
}
