use crate::{AttractorError, Graph, Node, NodeOutcome, RuntimeContext, handlers::NodeHandler};
use async_trait::async_trait;

/// The exit node carries no work of its own. Goal-gate verification and
/// termination happen in the main loop once this outcome is applied.
#[derive(Debug, Default)]
pub struct ExitHandler;

#[async_trait]
impl NodeHandler for ExitHandler {
    async fn execute(
        &self,
        _node: &Node,
        _context: &RuntimeContext,
        _graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        Ok(NodeOutcome::success())
    }
}
