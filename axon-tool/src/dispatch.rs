//! The dispatch pipeline: strip reserved fields, validate, route, finish.
//!
//! `prepare` turns a planner-requested [`ToolCall`] into either a rejected
//! result (unknown tool, payload violations) or a routed call; `finish`
//! turns the raw activity outcome back into a [`ToolResult`] with decoded
//! value, preview, and bounded metadata. Rejections never reach executors.

use std::sync::Arc;

use axon_engine::EngineError;
use axon_types::{
    ArtifactsMode, BoundedMeta, Message, ContentBlock, RetryHint, RetryReason, ToolCall,
    ToolCallId, ToolFailure, ToolResult, ToolTelemetry,
};

use crate::spec::{RegisteredTool, ToolSpec, ToolsetRegistration, ToolsetRegistry};

/// The reserved payload field naming the artifacts mode.
pub const ARTIFACTS_FIELD: &str = "artifacts";

/// The reserved result field carrying bounded-result metadata.
pub const BOUNDED_FIELD: &str = "_bounded";

/// A call that passed lookup and validation and is ready to execute.
pub struct PreparedCall {
    /// The call id.
    pub call_id: ToolCallId,
    /// Fully-qualified tool name.
    pub tool_name: String,
    /// The owning toolset registration.
    pub toolset: Arc<ToolsetRegistration>,
    /// The tool spec.
    pub spec: ToolSpec,
    /// The stripped, validated payload.
    pub payload: serde_json::Value,
    /// Canonical payload bytes.
    pub payload_bytes: Vec<u8>,
    /// The artifacts mode requested in the raw payload.
    pub artifacts: ArtifactsMode,
}

/// Outcome of preparing a tool call.
pub enum Prepared {
    /// The call never executes; the result is already final.
    Rejected(Box<ToolResult>),
    /// Execute as an `execute_tool` activity on the toolset's queue.
    Activity(Box<PreparedCall>),
    /// Execute inline within the calling workflow.
    Inline(Box<PreparedCall>),
}

/// The tool dispatcher. Stateless besides the registry reference.
pub struct Dispatcher {
    registry: Arc<ToolsetRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: Arc<ToolsetRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolsetRegistry> {
        &self.registry
    }

    /// Resolve, strip, and validate a planner-requested call.
    pub fn prepare(&self, call: &ToolCall) -> Prepared {
        let Some((toolset, tool)) = self.registry.resolve(&call.name) else {
            tracing::debug!(tool = %call.name, "requested tool is not registered");
            return Prepared::Rejected(Box::new(ToolResult::error(
                call.name.clone(),
                call.id.clone(),
                ToolFailure::new(format!("tool not found: {}", call.name)),
                Some(RetryHint::new(
                    RetryReason::ToolUnavailable,
                    format!("no tool named {} is registered", call.name),
                )),
            )));
        };

        let (payload, artifacts) = strip_artifacts(&call.payload);

        if let Err(rejection) = validate_payload(&tool, &payload) {
            return Prepared::Rejected(Box::new(ToolResult::error(
                call.name.clone(),
                call.id.clone(),
                ToolFailure::new(rejection.message.clone()),
                Some(rejection),
            )));
        }

        let payload_bytes = match tool.spec.payload_codec.encode(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Prepared::Rejected(Box::new(ToolResult::error(
                    call.name.clone(),
                    call.id.clone(),
                    ToolFailure::new(e.to_string()),
                    Some(RetryHint::new(RetryReason::InvalidArguments, e.to_string())),
                )));
            }
        };

        let prepared = Box::new(PreparedCall {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            spec: tool.spec.clone(),
            toolset: toolset.clone(),
            payload,
            payload_bytes,
            artifacts,
        });
        if toolset.backend.is_inline() {
            Prepared::Inline(prepared)
        } else {
            Prepared::Activity(prepared)
        }
    }

    /// Turn a raw activity outcome into the final [`ToolResult`].
    #[must_use]
    pub fn finish(
        &self,
        prepared: &PreparedCall,
        output: Result<serde_json::Value, EngineError>,
    ) -> ToolResult {
        match output {
            Ok(raw) => self.finish_value(prepared, raw),
            Err(e) => finish_error(prepared, &e),
        }
    }

    fn finish_value(&self, prepared: &PreparedCall, raw: serde_json::Value) -> ToolResult {
        // Normalize through the result codec so transcript bytes are canonical.
        let decoded = prepared
            .spec
            .result_codec
            .encode(&raw)
            .and_then(|bytes| prepared.spec.result_codec.decode(&bytes));
        let mut value = match decoded {
            Ok(value) => value,
            Err(e) => {
                return ToolResult::error(
                    prepared.tool_name.clone(),
                    prepared.call_id.clone(),
                    ToolFailure::new(e.to_string()),
                    Some(RetryHint::new(RetryReason::SchemaMismatch, e.to_string())),
                );
            }
        };

        let bounded = extract_bounded(&mut value);
        let preview = prepared
            .spec
            .result_hint
            .as_deref()
            .map(|template| render_preview(template, &value));

        let mut result = ToolResult::success(prepared.tool_name.clone(), prepared.call_id.clone(), value);
        result.telemetry = ToolTelemetry {
            duration_ms: None,
            bounded,
        };
        result.preview = preview;
        result
    }
}

fn finish_error(prepared: &PreparedCall, err: &EngineError) -> ToolResult {
    let hint = match err {
        EngineError::ActivityTimeout { timeout, .. } => Some(RetryHint::new(
            RetryReason::Timeout,
            format!("tool timed out after {timeout:?}"),
        )),
        EngineError::ActivityFailed { message, retryable, .. } => {
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("rate limit") || lowered.contains("429") {
                Some(RetryHint::new(RetryReason::RateLimited, message.clone()))
            } else if *retryable {
                Some(RetryHint::new(RetryReason::Timeout, message.clone()))
            } else {
                None
            }
        }
        _ => None,
    };
    ToolResult::error(
        prepared.tool_name.clone(),
        prepared.call_id.clone(),
        ToolFailure::new(err.to_string()),
        hint,
    )
}

/// Remove the reserved `artifacts` field from a raw payload, recording the
/// requested mode. Non-object payloads pass through untouched.
#[must_use]
pub fn strip_artifacts(payload: &serde_json::Value) -> (serde_json::Value, ArtifactsMode) {
    let serde_json::Value::Object(map) = payload else {
        return (payload.clone(), ArtifactsMode::Auto);
    };
    let mut stripped = map.clone();
    let mode = match stripped.remove(ARTIFACTS_FIELD) {
        Some(serde_json::Value::String(s)) => match s.as_str() {
            "on" => ArtifactsMode::On,
            "off" => ArtifactsMode::Off,
            _ => ArtifactsMode::Auto,
        },
        Some(serde_json::Value::Bool(true)) => ArtifactsMode::On,
        Some(serde_json::Value::Bool(false)) => ArtifactsMode::Off,
        _ => ArtifactsMode::Auto,
    };
    (serde_json::Value::Object(stripped), mode)
}

/// Validate a stripped payload, classifying violations into a retry hint:
/// schema `required` misses become `missing_fields`, anything else
/// `invalid_arguments`.
fn validate_payload(tool: &RegisteredTool, payload: &serde_json::Value) -> Result<(), RetryHint> {
    let mut missing: Vec<String> = Vec::new();
    let mut invalid: Vec<String> = Vec::new();
    for error in tool.validator.iter_errors(payload) {
        if let jsonschema::error::ValidationErrorKind::Required { property } = &error.kind {
            missing.push(property.as_str().unwrap_or_default().to_string());
        } else {
            invalid.push(error.instance_path.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(RetryHint::new(
            RetryReason::MissingFields,
            format!("missing required fields: {}", missing.join(", ")),
        )
        .with_fields(missing));
    }
    if !invalid.is_empty() {
        return Err(RetryHint::new(
            RetryReason::InvalidArguments,
            format!("invalid fields: {}", invalid.join(", ")),
        )
        .with_fields(invalid));
    }
    Ok(())
}

/// Extract and strip the reserved `_bounded` object from a decoded result.
fn extract_bounded(value: &mut serde_json::Value) -> Option<BoundedMeta> {
    let map = value.as_object_mut()?;
    let bounded = map.remove(BOUNDED_FIELD)?;
    serde_json::from_value(bounded).ok()
}

/// Render a `{field.path}` template against a decoded result value.
/// Unresolvable placeholders are left intact.
#[must_use]
pub fn render_preview(template: &str, value: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let path = &after[..end];
        let pointer = format!("/{}", path.replace('.', "/"));
        match value.pointer(&pointer) {
            Some(serde_json::Value::String(s)) => out.push_str(s),
            Some(serde_json::Value::Null) | None => {
                out.push('{');
                out.push_str(path);
                out.push('}');
            }
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Scan a run transcript for an earlier successful call to `tool_name` with
/// an identical canonical payload, returning its result content.
///
/// Used to short-circuit tools tagged `idempotency=transcript`; this is
/// policy the loop applies, not mandatory dispatcher behavior.
#[must_use]
pub fn transcript_duplicate(
    messages: &[Message],
    tool_name: &str,
    payload_bytes: &[u8],
    spec: &ToolSpec,
) -> Option<serde_json::Value> {
    for (index, message) in messages.iter().enumerate() {
        for block in &message.content {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };
            if name != tool_name {
                continue;
            }
            let (stripped, _) = strip_artifacts(input);
            let Ok(bytes) = spec.payload_codec.encode(&stripped) else {
                continue;
            };
            if bytes != payload_bytes {
                continue;
            }
            // Find the matching result in the following user turn.
            let result = messages.get(index + 1)?.content.iter().find_map(|b| {
                if let ContentBlock::ToolResult { tool_use_id, content, is_error } = b
                    && tool_use_id == id
                    && !*is_error
                {
                    Some(content.clone())
                } else {
                    None
                }
            });
            if result.is_some() {
                return result;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{
        IdempotencyMode, ToolExecutor, ToolsetBackend, ToolsetRegistration,
    };
    use async_trait::async_trait;
    use axon_types::{Role, ToolError, ToolOutcome, ToolRequest};
    use serde_json::json;

    struct NullExecutor;

    #[async_trait]
    impl ToolExecutor for NullExecutor {
        async fn execute(&self, _req: ToolRequest) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(ToolsetRegistry::new());
        registry
            .register(ToolsetRegistration {
                name: "helpers".into(),
                specs: vec![
                    ToolSpec::new("helpers", "answer")
                        .with_payload_schema(json!({
                            "type": "object",
                            "properties": {"question": {"type": "string"}},
                            "required": ["question"],
                            "additionalProperties": false
                        }))
                        .with_result_hint("answered: {text}")
                        .with_idempotency(IdempotencyMode::Transcript),
                ],
                backend: ToolsetBackend::Activity(Arc::new(NullExecutor)),
                queue: None,
            })
            .unwrap();
        Dispatcher::new(registry)
    }

    fn call(payload: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: "helpers.answer".into(),
            payload,
        }
    }

    #[test]
    fn unknown_tool_is_rejected_with_unavailable_hint() {
        let d = dispatcher();
        let Prepared::Rejected(result) = d.prepare(&ToolCall {
            id: "t1".into(),
            name: "nope.nothing".into(),
            payload: json!({}),
        }) else {
            panic!("expected rejection");
        };
        assert!(result.is_error());
        assert_eq!(result.retry_hint.as_ref().unwrap().reason, RetryReason::ToolUnavailable);
    }

    #[test]
    fn missing_required_field_classifies_missing_fields() {
        let d = dispatcher();
        let Prepared::Rejected(result) = d.prepare(&call(json!({}))) else {
            panic!("expected rejection");
        };
        let hint = result.retry_hint.as_ref().unwrap();
        assert_eq!(hint.reason, RetryReason::MissingFields);
        assert_eq!(hint.fields, vec!["question"]);
    }

    #[test]
    fn wrong_type_classifies_invalid_arguments() {
        let d = dispatcher();
        let Prepared::Rejected(result) = d.prepare(&call(json!({"question": 7}))) else {
            panic!("expected rejection");
        };
        assert_eq!(result.retry_hint.as_ref().unwrap().reason, RetryReason::InvalidArguments);
    }

    #[test]
    fn artifacts_field_is_stripped_before_validation() {
        let d = dispatcher();
        // With `additionalProperties: false`, an unstripped `artifacts` key
        // would fail validation.
        let Prepared::Activity(prepared) =
            d.prepare(&call(json!({"question": "2+2?", "artifacts": "on"})))
        else {
            panic!("expected activity routing");
        };
        assert_eq!(prepared.artifacts, ArtifactsMode::On);
        assert_eq!(prepared.payload, json!({"question": "2+2?"}));
    }

    #[test]
    fn finish_decodes_and_renders_preview() {
        let d = dispatcher();
        let Prepared::Activity(prepared) = d.prepare(&call(json!({"question": "2+2?"}))) else {
            panic!("expected activity routing");
        };
        let result = d.finish(&prepared, Ok(json!({"text": "4"})));
        assert!(!result.is_error());
        assert_eq!(result.preview.as_deref(), Some("answered: 4"));
    }

    #[test]
    fn finish_extracts_bounded_metadata() {
        let d = dispatcher();
        let Prepared::Activity(prepared) = d.prepare(&call(json!({"question": "list"}))) else {
            panic!("expected activity routing");
        };
        let result = d.finish(
            &prepared,
            Ok(json!({
                "text": "items",
                "_bounded": {"total": 100, "returned": 10, "truncated": true}
            })),
        );
        let bounded = result.telemetry.bounded.unwrap();
        assert_eq!(bounded.total, 100);
        assert!(bounded.truncated);
        let ToolOutcome::Success { value } = &result.outcome else {
            panic!("expected success");
        };
        assert!(value.get(BOUNDED_FIELD).is_none());
    }

    #[test]
    fn finish_maps_timeout_to_hint() {
        let d = dispatcher();
        let Prepared::Activity(prepared) = d.prepare(&call(json!({"question": "2+2?"}))) else {
            panic!("expected activity routing");
        };
        let result = d.finish(
            &prepared,
            Err(EngineError::ActivityTimeout {
                activity: "execute_tool".into(),
                timeout: std::time::Duration::from_secs(5),
            }),
        );
        assert!(result.is_error());
        assert_eq!(result.retry_hint.unwrap().reason, RetryReason::Timeout);
    }

    #[test]
    fn finish_maps_rate_limits() {
        let d = dispatcher();
        let Prepared::Activity(prepared) = d.prepare(&call(json!({"question": "2+2?"}))) else {
            panic!("expected activity routing");
        };
        let result = d.finish(
            &prepared,
            Err(EngineError::ActivityFailed {
                activity: "execute_tool".into(),
                message: "HTTP 429 rate limit exceeded".into(),
                retryable: true,
            }),
        );
        assert_eq!(result.retry_hint.unwrap().reason, RetryReason::RateLimited);
    }

    #[test]
    fn preview_leaves_unresolvable_placeholders() {
        assert_eq!(
            render_preview("got {a.b} and {missing}", &json!({"a": {"b": 3}})),
            "got 3 and {missing}"
        );
    }

    #[test]
    fn transcript_duplicate_finds_prior_success() {
        let d = dispatcher();
        let Prepared::Activity(prepared) = d.prepare(&call(json!({"question": "2+2?"}))) else {
            panic!("expected activity routing");
        };
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: vec![ContentBlock::ToolUse {
                    id: "t0".into(),
                    name: "helpers.answer".into(),
                    input: json!({"question": "2+2?"}),
                }],
            },
            Message {
                role: Role::User,
                content: vec![ContentBlock::ToolResult {
                    tool_use_id: "t0".into(),
                    content: json!({"text": "4"}),
                    is_error: false,
                }],
            },
        ];
        let prior = transcript_duplicate(
            &messages,
            &prepared.tool_name,
            &prepared.payload_bytes,
            &prepared.spec,
        );
        assert_eq!(prior, Some(json!({"text": "4"})));

        let other = d.prepare(&call(json!({"question": "3+3?"})));
        let Prepared::Activity(other) = other else {
            panic!("expected activity routing");
        };
        assert!(
            transcript_duplicate(&messages, &other.tool_name, &other.payload_bytes, &other.spec)
                .is_none()
        );
    }
}
