use crate::{AttractorError, Graph, Node, RuntimeContext};
use async_trait::async_trait;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Retry => "retry",
            Self::Fail => "fail",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_success_like(self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess | Self::Skipped)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeOutcome {
    pub status: NodeStatus,
    pub notes: Option<String>,
    pub context_updates: RuntimeContext,
    pub preferred_label: Option<String>,
    pub suggested_next_ids: Vec<String>,
    pub output: Option<String>,
}

impl NodeOutcome {
    pub fn success() -> Self {
        Self {
            status: NodeStatus::Success,
            notes: None,
            context_updates: RuntimeContext::new(),
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            output: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Fail,
            notes: Some(reason.into()),
            context_updates: RuntimeContext::new(),
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            output: None,
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Retry,
            notes: Some(reason.into()),
            context_updates: RuntimeContext::new(),
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            output: None,
        }
    }
}

/// Normalizes a loose handler-result payload (plain string, or an object using either
/// snake_case or camelCase keys) into a canonical `NodeOutcome`. Handlers external to
/// this crate are free to return either shape; the engine only ever sees the canonical
/// form afterward.
pub fn normalize_handler_result(value: serde_json::Value) -> NodeOutcome {
    use serde_json::Value;

    match value {
        Value::String(text) => {
            let mut outcome = NodeOutcome::success();
            outcome.output = Some(text);
            outcome
        }
        Value::Object(mut map) => {
            let status = map
                .remove("status")
                .and_then(|v| v.as_str().map(str::to_ascii_uppercase))
                .map(|status| match status.as_str() {
                    "SUCCESS" => NodeStatus::Success,
                    "PARTIAL_SUCCESS" => NodeStatus::PartialSuccess,
                    "RETRY" => NodeStatus::Retry,
                    "FAIL" => NodeStatus::Fail,
                    "SKIPPED" => NodeStatus::Skipped,
                    _ => NodeStatus::Fail,
                })
                .unwrap_or(NodeStatus::Success);

            let notes = take_str(&mut map, &["notes", "failureReason", "failure_reason"]);
            let preferred_label = take_str(&mut map, &["preferredLabel", "preferred_label"]);
            let output = take_str(&mut map, &["output"]);

            let suggested_next_ids = map
                .remove("suggestedNextIds")
                .or_else(|| map.remove("suggested_next_ids"))
                .and_then(|v| v.as_array().cloned())
                .map(|items| {
                    items
                        .into_iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            let context_updates = map
                .remove("contextUpdates")
                .or_else(|| map.remove("context_updates"))
                .and_then(|v| v.as_object().cloned())
                .map(|obj| obj.into_iter().collect())
                .unwrap_or_default();

            NodeOutcome {
                status,
                notes,
                context_updates,
                preferred_label,
                suggested_next_ids,
                output,
            }
        }
        other => {
            let mut outcome = NodeOutcome::success();
            outcome.output = Some(other.to_string());
            outcome
        }
    }
}

fn take_str(
    map: &mut serde_json::Map<String, serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    for key in keys {
        if let Some(value) = map.remove(*key) {
            if let Some(text) = value.as_str() {
                return Some(text.to_string());
            }
        }
    }
    None
}

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        context: &RuntimeContext,
        graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError>;
}

#[derive(Debug, Default)]
pub struct NoopNodeExecutor;

#[async_trait]
impl NodeExecutor for NoopNodeExecutor {
    async fn execute(
        &self,
        _node: &Node,
        _context: &RuntimeContext,
        _graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        Ok(NodeOutcome::success())
    }
}
