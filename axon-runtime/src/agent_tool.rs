//! Agents as tools: inline execution of nested runs.
//!
//! A toolset registered through [`crate::Runtime::register_agent_toolset`]
//! routes every call here. The nested run executes inside the parent's
//! workflow context, so its plan and tool activities land in the same
//! deterministic history, and it completes before the parent's tool batch
//! resolves — parent/child linkage is ids only, so no cycles can form.

use std::sync::Weak;

use async_trait::async_trait;
use serde_json::json;

use axon_engine::WorkflowContext;
use axon_loop::WorkflowRunInput;
use axon_tool::InlineToolExecutor;
use axon_types::{
    EventPayload, Message, RunContext, RunEvent, RunId, ToolError, ToolFailure, ToolRequest,
    ToolResult, CompletionStatus,
};

use crate::registry::RuntimeInner;

/// Inline executor that runs a target agent as a tool.
pub struct AgentToolExecutor {
    pub(crate) inner: Weak<RuntimeInner>,
}

/// Build the nested run's initial messages from the tool payload: either a
/// `message` string or a full `messages` array.
fn initial_messages(payload: &serde_json::Value) -> Result<Vec<Message>, ToolError> {
    if let Some(text) = payload.get("message").and_then(|m| m.as_str()) {
        return Ok(vec![Message::user(text)]);
    }
    if let Some(messages) = payload.get("messages") {
        return serde_json::from_value(messages.clone())
            .map_err(|e| ToolError::InvalidPayload(format!("bad messages array: {e}")));
    }
    Err(ToolError::InvalidPayload(
        "agent tools require a `message` string or `messages` array".to_string(),
    ))
}

#[async_trait]
impl InlineToolExecutor for AgentToolExecutor {
    async fn execute_inline(
        &self,
        wf: std::sync::Arc<dyn WorkflowContext>,
        req: ToolRequest,
    ) -> Result<ToolResult, ToolError> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| ToolError::ExecutionFailed("runtime has shut down".into()))?;
        let qualified = format!("{}.{}", req.toolset, req.tool);
        let spec = inner
            .toolsets
            .spec(&qualified)
            .ok_or_else(|| ToolError::NotFound(qualified.clone()))?;
        let target = spec
            .agent_tool
            .clone()
            .ok_or_else(|| ToolError::ExecutionFailed(format!("{qualified} is not an agent tool").into()))?;
        let agent = inner
            .agent(&target)
            .ok_or_else(|| ToolError::ExecutionFailed(format!("unknown agent: {target}").into()))?;

        let messages = initial_messages(&req.payload)?;
        let child_run_id = RunId::generate();
        let mut parent_ctx = RunContext::top_level(
            req.agent_id.clone(),
            req.run_id.clone(),
            req.session_id.clone(),
        );
        parent_ctx.turn_id = req.turn_id.clone();
        let child_ctx = parent_ctx.child(target.clone(), child_run_id.clone(), req.call_id.clone());

        let started = RunEvent::stamp(
            &parent_ctx,
            wf.now(),
            EventPayload::AgentRunStarted {
                child_run_id: child_run_id.clone(),
                child_agent_id: target.clone(),
                parent_tool_call_id: req.call_id.clone(),
            },
        );
        if let Err(e) = inner.bus.publish(&started).await {
            tracing::warn!(run_id = %req.run_id, error = %e, "hook subscriber failed");
        }

        let input = WorkflowRunInput {
            context: child_ctx,
            messages,
            policy: agent.default_policy.clone(),
            activities: agent.activities.clone(),
            default_task_queue: agent.default_task_queue.clone(),
        };
        let output = inner.machine.run(wf, input).await.map_err(|e| {
            if e.is_cancellation() {
                ToolError::Cancelled
            } else {
                ToolError::ExecutionFailed(Box::new(e))
            }
        })?;

        let children = output.tool_events.len() as u32;
        let mut result = match output.status {
            CompletionStatus::Success => ToolResult::success(
                qualified,
                req.call_id.clone(),
                json!({
                    "message": output.final_message,
                    "notes": output.notes,
                }),
            ),
            CompletionStatus::Failed => ToolResult::error(
                qualified,
                req.call_id.clone(),
                ToolFailure::new(
                    output
                        .public_error
                        .unwrap_or_else(|| "nested run failed".to_string()),
                ),
                None,
            ),
            CompletionStatus::Canceled => return Err(ToolError::Cancelled),
        };
        result.children = children;
        result.nested_run_id = Some(child_run_id);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_accept_message_or_messages() {
        let single = initial_messages(&json!({"message": "hi"})).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].text(), "hi");

        let full = initial_messages(&json!({
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hey"}]}]
        }))
        .unwrap();
        assert_eq!(full[0].text(), "hey");

        assert!(initial_messages(&json!({})).is_err());
    }
}
