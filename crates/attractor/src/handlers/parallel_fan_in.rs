use crate::{AttractorError, Graph, Node, NodeOutcome, RuntimeContext, handlers::NodeHandler};
use async_trait::async_trait;

/// A fan-in node is a convergence marker for a `parallel` node's branches; the
/// aggregation itself happens inside `ParallelHandler` before the main loop
/// ever steps onto this node, so executing it directly is a no-op success.
#[derive(Debug, Default)]
pub struct ParallelFanInHandler;

#[async_trait]
impl NodeHandler for ParallelFanInHandler {
    async fn execute(
        &self,
        _node: &Node,
        _context: &RuntimeContext,
        _graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        Ok(NodeOutcome::success())
    }
}
