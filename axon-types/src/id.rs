//! Typed ID wrappers for agents, runs, sessions, turns, tools, and toolsets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up agent ids, run ids, session ids, and
/// friends at API boundaries. They are strings underneath — no format is
/// imposed beyond non-emptiness where a constructor says so.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(AgentId, "Unique identifier for a registered agent.");
typed_id!(RunId, "Unique identifier for one run of an agent.");
typed_id!(SessionId, "Unique identifier for a conversation session.");
typed_id!(TurnId, "Identifier for a turn within a session.");
typed_id!(ToolCallId, "Identifier for a single planner-requested tool call.");
typed_id!(ToolsetId, "Identifier for a registered toolset.");
typed_id!(ModelId, "Identifier for a registered model client.");

impl RunId {
    /// Generate a fresh random run id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl ToolCallId {
    /// Generate a fresh random tool-call id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
