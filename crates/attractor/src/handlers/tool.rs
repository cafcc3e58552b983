use crate::{
    AttractorError, Graph, Node, NodeOutcome, NodeStatus, RuntimeContext, handlers::NodeHandler,
};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct ToolHandler;

#[async_trait]
impl NodeHandler for ToolHandler {
    async fn execute(
        &self,
        node: &Node,
        _context: &RuntimeContext,
        _graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        let tool = node.attrs.get_str("tool").unwrap_or_default().trim();
        let command = node.attrs.get_str("command").unwrap_or_default().trim();
        if tool.is_empty() && command.is_empty() {
            return Ok(NodeOutcome::failure("No tool or command specified"));
        }

        let cwd = node.attrs.get_str("cwd").unwrap_or(".");
        let label = if !tool.is_empty() { tool } else { command };
        let output = format!("[Simulated tool output] {label} (cwd={cwd})");

        let mut updates = RuntimeContext::new();
        updates.insert("tool.output".to_string(), Value::String(output.clone()));

        Ok(NodeOutcome {
            status: NodeStatus::Success,
            notes: Some(format!("Tool completed: {label}")),
            context_updates: updates,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            output: Some(output),
        })
    }
}
