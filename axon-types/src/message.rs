//! Conversation messages and content blocks.

use serde::{Deserialize, Serialize};

use crate::id::ToolCallId;

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A human user (or the runtime speaking on their behalf, e.g. tool results).
    User,
    /// The planner / model.
    Assistant,
}

/// A content block within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text content.
    Text {
        /// The text.
        text: String,
    },
    /// Extended thinking from reasoning models. The signature is
    /// provider-issued and must be carried verbatim.
    Thinking {
        /// The thinking text.
        thinking: String,
        /// Provider signature over the thinking bytes.
        signature: String,
    },
    /// Redacted thinking: opaque provider bytes, carried verbatim.
    RedactedThinking {
        /// Opaque data blob.
        data: String,
    },
    /// A tool invocation declared by the assistant.
    ToolUse {
        /// Identifier for this tool call.
        id: ToolCallId,
        /// Fully-qualified tool name.
        name: String,
        /// JSON input payload.
        input: serde_json::Value,
    },
    /// The result of a tool invocation, in a user-role turn.
    ToolResult {
        /// References the `id` of the matching `ToolUse`.
        tool_use_id: ToolCallId,
        /// Result content.
        content: serde_json::Value,
        /// Whether this result represents an error.
        is_error: bool,
    },
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// The content blocks of this message.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a user message with a single text block.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Create an assistant message with a single text block.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenated text of all `Text` blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// The tool uses declared in this message, in declaration order.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.content
            .iter()
            .filter(|block| matches!(block, ContentBlock::ToolUse { .. }))
            .collect()
    }
}
