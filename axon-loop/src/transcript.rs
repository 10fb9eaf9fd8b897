//! The transcript: the validated conversation buffer fed to the planner.
//!
//! The validator enforces the provider-ledger shape: roles alternate after
//! the opening user message; assistant turns order their blocks thinking →
//! text → tool uses; a user turn following an assistant turn with `k`
//! declared tool uses carries exactly `k` tool results matching the declared
//! ids in order. Thinking signatures and redacted bytes pass through
//! untouched.

use axon_types::{ContentBlock, Message, Role, ToolCallId, ToolResult, TranscriptError};

/// Ordered, validated conversation buffer.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Build a transcript from initial messages, validating them.
    ///
    /// # Errors
    ///
    /// The first [`TranscriptError`] the validator finds.
    pub fn new(initial: Vec<Message>) -> Result<Self, TranscriptError> {
        let transcript = Self { messages: initial };
        transcript.validate()?;
        Ok(transcript)
    }

    /// The messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Push a message, backing it out again if it breaks the invariants.
    fn push_validated(&mut self, message: Message) -> Result<(), TranscriptError> {
        self.messages.push(message);
        if let Err(e) = self.validate() {
            self.messages.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Append an assistant turn: thinking blocks, optional text, declared
    /// tool uses — in that order.
    pub fn push_assistant_turn(
        &mut self,
        thinking: Vec<ContentBlock>,
        text: Option<String>,
        tool_uses: Vec<ContentBlock>,
    ) -> Result<(), TranscriptError> {
        let mut content = thinking;
        if let Some(text) = text {
            content.push(ContentBlock::Text { text });
        }
        content.extend(tool_uses);
        self.push_validated(Message {
            role: Role::Assistant,
            content,
        })
    }

    /// Append a complete assistant message.
    pub fn push_assistant(&mut self, message: Message) -> Result<(), TranscriptError> {
        self.push_validated(message)
    }

    /// Append a user text message.
    pub fn push_user_text(&mut self, text: impl Into<String>) -> Result<(), TranscriptError> {
        self.push_validated(Message::user(text))
    }

    /// Append the user turn answering the last assistant turn's tool uses.
    /// Results are reordered to match the declared order before appending.
    ///
    /// # Errors
    ///
    /// [`TranscriptError::ToolResultCount`] when the batch does not cover
    /// the declared uses exactly.
    pub fn push_tool_results(&mut self, results: &[ToolResult]) -> Result<(), TranscriptError> {
        let declared = self.pending_tool_uses();
        let index = self.messages.len();
        if declared.len() != results.len() {
            return Err(TranscriptError::ToolResultCount {
                index,
                expected: declared.len(),
                found: results.len(),
            });
        }
        let mut content = Vec::with_capacity(declared.len());
        for id in &declared {
            let result = results
                .iter()
                .find(|r| &r.call_id == id)
                .ok_or_else(|| TranscriptError::ToolResultMismatch {
                    index,
                    expected: id.to_string(),
                    found: "<absent>".to_string(),
                })?;
            content.push(ContentBlock::ToolResult {
                tool_use_id: result.call_id.clone(),
                content: result.transcript_content(),
                is_error: result.is_error(),
            });
        }
        self.push_validated(Message {
            role: Role::User,
            content,
        })
    }

    /// The tool-use ids declared by the last assistant message, when it is
    /// the latest message (i.e. still unanswered).
    #[must_use]
    pub fn pending_tool_uses(&self) -> Vec<ToolCallId> {
        let Some(last) = self.messages.last() else {
            return Vec::new();
        };
        if last.role != Role::Assistant {
            return Vec::new();
        }
        last.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Run the full validator over the buffer.
    ///
    /// # Errors
    ///
    /// The first violation found.
    pub fn validate(&self) -> Result<(), TranscriptError> {
        let mut previous_role: Option<Role> = None;
        let mut declared: Vec<ToolCallId> = Vec::new();

        for (index, message) in self.messages.iter().enumerate() {
            if previous_role == Some(message.role) {
                return Err(TranscriptError::RolesMustAlternate {
                    index,
                    role: format!("{:?}", message.role).to_lowercase(),
                });
            }

            match message.role {
                Role::Assistant => {
                    validate_assistant_blocks(index, message)?;
                    declared = message
                        .content
                        .iter()
                        .filter_map(|block| match block {
                            ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                            _ => None,
                        })
                        .collect();
                }
                Role::User => {
                    let found: Vec<&ToolCallId> = message
                        .content
                        .iter()
                        .filter_map(|block| match block {
                            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id),
                            _ => None,
                        })
                        .collect();
                    if found.len() != declared.len() {
                        return Err(TranscriptError::ToolResultCount {
                            index,
                            expected: declared.len(),
                            found: found.len(),
                        });
                    }
                    for (expected, found) in declared.iter().zip(found) {
                        if expected != found {
                            return Err(TranscriptError::ToolResultMismatch {
                                index,
                                expected: expected.to_string(),
                                found: found.to_string(),
                            });
                        }
                    }
                    declared = Vec::new();
                }
            }
            previous_role = Some(message.role);
        }
        Ok(())
    }
}

/// Enforce thinking → text → tool-use ordering with at most one text block.
fn validate_assistant_blocks(index: usize, message: &Message) -> Result<(), TranscriptError> {
    // 0 = thinking, 1 = text, 2 = tool uses; stages may only advance.
    let mut stage = 0u8;
    let mut text_blocks = 0usize;
    for block in &message.content {
        let block_stage = match block {
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => 0,
            ContentBlock::Text { .. } => 1,
            ContentBlock::ToolUse { .. } => 2,
            ContentBlock::ToolResult { .. } => {
                return Err(TranscriptError::AssistantBlockOrder {
                    index,
                    detail: "tool results belong to user turns".to_string(),
                });
            }
        };
        if block_stage < stage {
            return Err(TranscriptError::AssistantBlockOrder {
                index,
                detail: "blocks must order thinking, text, tool uses".to_string(),
            });
        }
        stage = block_stage;
        if matches!(block, ContentBlock::Text { .. }) {
            text_blocks += 1;
            if text_blocks > 1 {
                return Err(TranscriptError::AssistantBlockOrder {
                    index,
                    detail: "at most one text block per assistant turn".to_string(),
                });
            }
        }
    }
    Ok(())
}
