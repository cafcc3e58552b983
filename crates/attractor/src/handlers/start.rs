use crate::{AttractorError, Graph, Node, NodeOutcome, RuntimeContext, handlers::NodeHandler};
use async_trait::async_trait;

/// The start node carries no work of its own; it always succeeds so the main
/// loop can move immediately to the first outgoing edge.
#[derive(Debug, Default)]
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    async fn execute(
        &self,
        _node: &Node,
        _context: &RuntimeContext,
        _graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        Ok(NodeOutcome::success())
    }
}
