use crate::handlers::registry::resolve_handler_type_from_node;
use crate::routing::select_next_edge;
use crate::{
    AttractorError, Graph, Node, NodeExecutor, NodeOutcome, NodeStatus, RuntimeContext,
    handlers::NodeHandler,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const MAX_BRANCH_STEPS: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JoinPolicy {
    WaitAll,
    FirstSuccess,
    KOfN,
    Quorum,
}

impl JoinPolicy {
    fn as_str(self) -> &'static str {
        match self {
            Self::WaitAll => "wait_all",
            Self::FirstSuccess => "first_success",
            Self::KOfN => "k_of_n",
            Self::Quorum => "quorum",
        }
    }
}

#[derive(Clone, Debug)]
struct BranchResult {
    branch_name: String,
    start_node: String,
    status: NodeStatus,
    notes: Option<String>,
    output: Option<String>,
}

/// Executes the independent branches hanging off a `parallel` node down to
/// their shared fan-in, aggregating the result according to `join_policy`.
///
/// Branch nodes are dispatched through an injected `NodeExecutor` so this
/// handler never needs a copy of the full handler registry; nested `parallel`
/// nodes are rejected rather than dispatched recursively.
pub struct ParallelHandler {
    branch_executor: Arc<dyn NodeExecutor>,
}

impl ParallelHandler {
    pub fn new(branch_executor: Arc<dyn NodeExecutor>) -> Self {
        Self { branch_executor }
    }
}

impl Default for ParallelHandler {
    fn default() -> Self {
        Self::new(Arc::new(crate::NoopNodeExecutor))
    }
}

#[async_trait]
impl NodeHandler for ParallelHandler {
    async fn execute(
        &self,
        node: &Node,
        context: &RuntimeContext,
        graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        let branches: Vec<(String, String)> = graph
            .outgoing_edges(&node.id)
            .map(|edge| {
                let name = edge
                    .attrs
                    .get_str("label")
                    .filter(|label| !label.trim().is_empty())
                    .unwrap_or(edge.to.as_str())
                    .to_string();
                (name, edge.to.clone())
            })
            .collect();

        if branches.is_empty() {
            return Ok(NodeOutcome::failure(format!(
                "parallel node '{}' has no outgoing branches",
                node.id
            )));
        }

        let fan_in_id = match resolve_shared_fan_in(graph, &branches) {
            Ok(id) => id,
            Err(reason) => return Ok(NodeOutcome::failure(reason)),
        };

        // Branches progress concurrently on this task via a join-all scope: each
        // gets its own deep-copied context and none observes another's mutations
        // until all have finished and the parent state is written once below.
        let branch_futures = branches.iter().map(|(branch_name, start_node)| {
            self.run_branch(
                branch_name,
                start_node,
                fan_in_id.as_deref(),
                context.clone(),
                graph,
            )
        });
        let mut results = Vec::with_capacity(branches.len());
        for result in futures::future::join_all(branch_futures).await {
            results.push(result?);
        }
        results.sort_by(|left, right| left.branch_name.cmp(&right.branch_name));

        let join_policy = parse_join_policy(node);
        let n = results.len();
        let success_count = results
            .iter()
            .filter(|result| result.status.is_success_like())
            .count();
        let fail_count = n - success_count;

        let (status, summary) = match join_policy {
            JoinPolicy::WaitAll => {
                if fail_count == 0 {
                    (NodeStatus::Success, format!("all {n} branches completed"))
                } else if success_count > 0 {
                    (
                        NodeStatus::PartialSuccess,
                        format!("{success_count} of {n} branches succeeded"),
                    )
                } else {
                    (NodeStatus::Fail, format!("all {n} branches failed"))
                }
            }
            JoinPolicy::FirstSuccess => {
                if success_count > 0 {
                    (
                        NodeStatus::Success,
                        format!("{success_count} of {n} branches succeeded"),
                    )
                } else {
                    (NodeStatus::Fail, "no branch succeeded".to_string())
                }
            }
            JoinPolicy::KOfN => {
                let k = k_target(node, n);
                if success_count >= k {
                    (
                        NodeStatus::Success,
                        format!("{success_count} of {n} branches succeeded (required {k})"),
                    )
                } else {
                    (
                        NodeStatus::Fail,
                        format!("{success_count} of {n} branches succeeded (required {k})"),
                    )
                }
            }
            JoinPolicy::Quorum => {
                let ratio = quorum_ratio(node);
                let achieved = success_count as f64 / n as f64;
                if achieved >= ratio {
                    (
                        NodeStatus::Success,
                        format!(
                            "quorum met: {success_count}/{n} ({:.0}% >= {:.0}%)",
                            achieved * 100.0,
                            ratio * 100.0
                        ),
                    )
                } else {
                    (
                        NodeStatus::Fail,
                        format!(
                            "quorum not met: {success_count}/{n} ({:.0}% < {:.0}%)",
                            achieved * 100.0,
                            ratio * 100.0
                        ),
                    )
                }
            }
        };

        let mut branch_outputs: BTreeMap<String, Value> = BTreeMap::new();
        for result in &results {
            branch_outputs.insert(
                result.branch_name.clone(),
                Value::String(result.output.clone().unwrap_or_default()),
            );
        }

        let mut updates = RuntimeContext::new();
        if let Some(fan_in) = fan_in_id.as_ref() {
            updates.insert("parallel.fan_in".to_string(), Value::String(fan_in.clone()));
        }
        updates.insert(
            "parallel.results".to_string(),
            Value::Array(results.iter().map(branch_result_to_value).collect()),
        );
        updates.insert(
            format!("parallelOutputs.{}", node.id),
            Value::Object(branch_outputs.into_iter().collect()),
        );
        updates.insert(
            "parallel.success_count".to_string(),
            Value::Number((success_count as u64).into()),
        );
        updates.insert(
            "parallel.fail_count".to_string(),
            Value::Number((fail_count as u64).into()),
        );
        updates.insert(
            "parallel.join_policy".to_string(),
            Value::String(join_policy.as_str().to_string()),
        );

        Ok(NodeOutcome {
            status,
            notes: Some(summary),
            context_updates: updates,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            output: None,
        })
    }
}

impl ParallelHandler {
    async fn run_branch(
        &self,
        branch_name: &str,
        start_node: &str,
        fan_in_id: Option<&str>,
        mut branch_context: RuntimeContext,
        graph: &Graph,
    ) -> Result<BranchResult, AttractorError> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut current = start_node.to_string();
        let node_outputs: BTreeMap<String, String> = BTreeMap::new();
        let parallel_outputs: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut last_output: Option<String> = None;

        for _ in 0..MAX_BRANCH_STEPS {
            if !visited.insert(current.clone()) {
                return Ok(BranchResult {
                    branch_name: branch_name.to_string(),
                    start_node: start_node.to_string(),
                    status: NodeStatus::Fail,
                    notes: Some(format!("Loop detected in parallel branch at node {current}")),
                    output: last_output,
                });
            }

            let Some(node) = graph.nodes.get(&current) else {
                return Ok(BranchResult {
                    branch_name: branch_name.to_string(),
                    start_node: start_node.to_string(),
                    status: NodeStatus::Fail,
                    notes: Some(format!("unknown node '{current}' in parallel branch")),
                    output: last_output,
                });
            };

            if resolve_handler_type_from_node(node) == "parallel" {
                return Ok(BranchResult {
                    branch_name: branch_name.to_string(),
                    start_node: start_node.to_string(),
                    status: NodeStatus::Fail,
                    notes: Some(format!(
                        "nested parallel node '{current}' is not supported"
                    )),
                    output: last_output,
                });
            }

            let outcome = self
                .branch_executor
                .execute(node, &branch_context, graph)
                .await?;
            last_output = outcome.output.clone().or(last_output);
            for (key, value) in &outcome.context_updates {
                branch_context.insert(key.clone(), value.clone());
            }

            if outcome.status == NodeStatus::Fail {
                return Ok(BranchResult {
                    branch_name: branch_name.to_string(),
                    start_node: start_node.to_string(),
                    status: NodeStatus::Fail,
                    notes: outcome.notes,
                    output: last_output,
                });
            }

            if Some(current.as_str()) == fan_in_id {
                return Ok(BranchResult {
                    branch_name: branch_name.to_string(),
                    start_node: start_node.to_string(),
                    status: NodeStatus::Success,
                    notes: Some(format!("branch reached fan-in at {current}")),
                    output: last_output,
                });
            }
            if graph
                .terminal_candidates()
                .iter()
                .any(|candidate| candidate.id == current)
            {
                return Ok(BranchResult {
                    branch_name: branch_name.to_string(),
                    start_node: start_node.to_string(),
                    status: NodeStatus::Success,
                    notes: Some(format!("branch reached exit at {current}")),
                    output: last_output,
                });
            }

            let Some(edge) = select_next_edge(
                graph,
                &current,
                &outcome,
                &branch_context,
                &node_outputs,
                &parallel_outputs,
            ) else {
                return Ok(BranchResult {
                    branch_name: branch_name.to_string(),
                    start_node: start_node.to_string(),
                    status: NodeStatus::Fail,
                    notes: Some(format!(
                        "branch stalled with no outgoing edge from {current}"
                    )),
                    output: last_output,
                });
            };
            current = edge.to.clone();
        }

        Ok(BranchResult {
            branch_name: branch_name.to_string(),
            start_node: start_node.to_string(),
            status: NodeStatus::Fail,
            notes: Some("branch exceeded maximum step count".to_string()),
            output: last_output,
        })
    }
}

/// Walks each branch assuming `SUCCESS` at every step to find the node it
/// would converge on; all branches must converge on the same `parallel.fan_in`
/// node for the parallel node to be runnable.
fn resolve_shared_fan_in(
    graph: &Graph,
    branches: &[(String, String)],
) -> Result<Option<String>, String> {
    let mut resolved: BTreeSet<String> = BTreeSet::new();
    let empty_context = RuntimeContext::new();
    let empty_node_outputs: BTreeMap<String, String> = BTreeMap::new();
    let empty_parallel_outputs: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

    for (_, start_node) in branches {
        let mut visited = BTreeSet::new();
        let mut current = start_node.clone();
        loop {
            if !visited.insert(current.clone()) {
                break;
            }
            let Some(node) = graph.nodes.get(&current) else {
                break;
            };
            if resolve_handler_type_from_node(node) == "parallel.fan_in" {
                resolved.insert(current.clone());
                break;
            }
            if graph
                .terminal_candidates()
                .iter()
                .any(|candidate| candidate.id == current)
            {
                break;
            }
            let outcome = NodeOutcome::success();
            let Some(edge) = select_next_edge(
                graph,
                &current,
                &outcome,
                &empty_context,
                &empty_node_outputs,
                &empty_parallel_outputs,
            ) else {
                break;
            };
            current = edge.to.clone();
        }
    }

    match resolved.len() {
        0 => Ok(None),
        1 => Ok(resolved.into_iter().next()),
        _ => Err(format!(
            "parallel branches resolve to {} distinct fan-in nodes, expected one",
            resolved.len()
        )),
    }
}

fn parse_join_policy(node: &Node) -> JoinPolicy {
    match node
        .attrs
        .get_str("join_policy")
        .unwrap_or("wait_all")
        .trim()
    {
        "first_success" => JoinPolicy::FirstSuccess,
        "k_of_n" => JoinPolicy::KOfN,
        "quorum" => JoinPolicy::Quorum,
        _ => JoinPolicy::WaitAll,
    }
}

fn k_target(node: &Node, branch_count: usize) -> usize {
    if let Some(explicit) = node.attrs.get("k").and_then(|value| match value {
        crate::AttrValue::Integer(value) if *value >= 1 => Some(*value as usize),
        crate::AttrValue::String(value) => value.parse::<usize>().ok(),
        _ => None,
    }) {
        return explicit.min(branch_count.max(1));
    }
    (branch_count as f64 / 2.0).ceil().max(1.0) as usize
}

fn quorum_ratio(node: &Node) -> f64 {
    match node.attrs.get("quorum_ratio") {
        Some(crate::AttrValue::Float(value)) => *value,
        Some(crate::AttrValue::Integer(value)) => *value as f64,
        Some(crate::AttrValue::String(value)) => value.parse::<f64>().unwrap_or(0.5),
        _ => 0.5,
    }
    .clamp(0.0, 1.0)
}

fn branch_result_to_value(result: &BranchResult) -> Value {
    json!({
        "branch_name": result.branch_name,
        "start_node": result.start_node,
        "status": result.status.as_str(),
        "notes": result.notes,
        "output": result.output,
    })
}
