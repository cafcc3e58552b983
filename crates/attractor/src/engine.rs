//! Main step loop: drives a graph from its start node to a terminal node,
//! dispatching node handlers through an injected [`NodeExecutor`], retrying
//! transient failures with backoff, running parallel branches, redirecting to
//! retry targets on failure and on unsatisfied goal gates, and streaming
//! progress events and checkpoints through pluggable sinks.

use crate::errors::is_retryable;
use crate::handlers::{self, registry::RegistryNodeExecutor};
use crate::retry::{
    RetryBackoffConfig, RetryPolicy, build_retry_policy, delay_for_attempt_ms,
    finalize_retry_exhausted, should_retry_outcome,
};
use crate::routing::{select_fail_edge, select_next_edge};
use crate::{
    AttractorError, GoalGateEvent, Graph, Node, NodeExecutor, NodeOutcome, NodeStatus,
    ParallelEvent, PipelineEvent, RuntimeContext, RuntimeEvent, RuntimeEventKind, RuntimeEventSink,
    StageEvent, validate_or_raise,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_MAX_STEPS: u32 = 1000;

/// In-memory record carried across the run: untyped context, per-node string
/// outputs, per-parallel-node branch outputs, the last outcome per node,
/// retry counters, and the ordered list of nodes executed so far.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineState {
    pub context: RuntimeContext,
    pub node_outputs: BTreeMap<String, String>,
    pub parallel_outputs: BTreeMap<String, BTreeMap<String, String>>,
    pub node_outcomes: BTreeMap<String, NodeOutcome>,
    pub node_retry_counts: BTreeMap<String, u32>,
    pub completed_nodes: Vec<String>,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(context: RuntimeContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn save_checkpoint(&self, node_id: &str, state: &EngineState);
}

#[derive(Debug, Default)]
pub struct NoopCheckpointSink;

#[async_trait]
impl CheckpointSink for NoopCheckpointSink {
    async fn save_checkpoint(&self, _node_id: &str, _state: &EngineState) {}
}

#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn save_outcome(&self, node_id: &str, status: NodeStatus, outcome: &NodeOutcome, attempt: u32);
}

#[derive(Debug, Default)]
pub struct NoopOutcomeSink;

#[async_trait]
impl OutcomeSink for NoopOutcomeSink {
    async fn save_outcome(
        &self,
        _node_id: &str,
        _status: NodeStatus,
        _outcome: &NodeOutcome,
        _attempt: u32,
    ) {
    }
}

/// Engine-tunable configuration, supplied by the embedder as a typed builder
/// rather than loaded from a config file.
#[derive(Clone)]
pub struct EngineConfig {
    pub executor: Arc<dyn NodeExecutor>,
    pub max_steps: u32,
    pub backoff: RetryBackoffConfig,
    pub events: RuntimeEventSink,
    pub checkpoints: Arc<dyn CheckpointSink>,
    pub outcomes: Arc<dyn OutcomeSink>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor: Arc::new(RegistryNodeExecutor::new(handlers::core_registry())),
            max_steps: DEFAULT_MAX_STEPS,
            backoff: RetryBackoffConfig::default(),
            events: RuntimeEventSink::default(),
            checkpoints: Arc::new(NoopCheckpointSink),
            outcomes: Arc::new(NoopOutcomeSink),
            cancel: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunResult {
    pub state: EngineState,
    pub exit_node_id: String,
}

/// Drives `graph` from `start_node_id` (or the graph's resolved start node)
/// to a terminal node, returning the final state and the id of the node the
/// run terminated on. Fatal conditions (structural errors, exhausted step
/// budget, unsatisfied goal gate with no retry target, cancellation) are
/// returned as `Err`.
pub async fn run(
    graph: &Graph,
    config: &EngineConfig,
    mut state: EngineState,
    start_node_id: Option<&str>,
) -> Result<RunResult, AttractorError> {
    validate_or_raise(graph, &[])?;

    let run_id = format!("{}-run", graph.id);
    let mut sequence_no = 0u64;
    let mut current = match start_node_id {
        Some(id) => id.to_string(),
        None => resolve_start_node(graph)?.id.clone(),
    };

    emit(
        config,
        &mut sequence_no,
        RuntimeEventKind::Pipeline(PipelineEvent::Started {
            run_id: run_id.clone(),
            graph_id: graph.id.clone(),
            lineage_attempt: 1,
        }),
    );

    let mut step_count: u32 = 0;
    loop {
        if let Some(cancel) = config.cancel.as_ref() {
            if cancel.load(Ordering::SeqCst) {
                return Err(AttractorError::Cancelled { node_id: current });
            }
        }

        step_count += 1;
        if step_count > config.max_steps {
            return Err(AttractorError::StepBudgetExceeded {
                node_id: current,
                max_steps: config.max_steps,
            });
        }

        let node = graph.nodes.get(&current).ok_or_else(|| {
            AttractorError::structural(
                current.clone(),
                format!("run reached unknown node '{current}'"),
            )
        })?;
        tracing::debug!(run_id = %run_id, node = %node.id, step = step_count, "stepping graph");
        config.checkpoints.save_checkpoint(&current, &state).await;

        if is_terminal(graph, node) {
            if let Some(failed_gate_id) = first_unsatisfied_goal_gate(graph, &state.node_outcomes) {
                if let Some(target) = resolve_retry_target(graph, &failed_gate_id) {
                    tracing::info!(
                        run_id = %run_id,
                        node = %failed_gate_id,
                        retry_target = %target,
                        "goal gate unsatisfied, redirecting"
                    );
                    emit(
                        config,
                        &mut sequence_no,
                        RuntimeEventKind::GoalGate(GoalGateEvent::Redirected {
                            run_id: run_id.clone(),
                            node_id: failed_gate_id,
                            retry_target: target.clone(),
                        }),
                    );
                    current = target;
                    continue;
                }
                return Err(AttractorError::GoalGateUnsatisfied {
                    node_id: failed_gate_id,
                });
            }

            mark_completed(&mut state, &current);
            emit(
                config,
                &mut sequence_no,
                RuntimeEventKind::Pipeline(PipelineEvent::Completed {
                    run_id: run_id.clone(),
                    graph_id: graph.id.clone(),
                    lineage_attempt: 1,
                }),
            );
            return Ok(RunResult {
                state,
                exit_node_id: current,
            });
        }

        if handlers::resolve_handler_type_from_node(node) == "parallel" {
            let branch_count = graph.outgoing_edges(&node.id).count();
            tracing::info!(run_id = %run_id, node = %node.id, branch_count, "parallel node started");
            emit(
                config,
                &mut sequence_no,
                RuntimeEventKind::Parallel(ParallelEvent::Started {
                    run_id: run_id.clone(),
                    node_id: node.id.clone(),
                    branch_count,
                }),
            );

            let outcome = match config.executor.execute(node, &state.context, graph).await {
                Ok(outcome) => outcome,
                Err(error) => outcome_for_thrown_error(node, error),
            };
            config
                .outcomes
                .save_outcome(&node.id, outcome.status, &outcome, 1)
                .await;

            let success_count = outcome
                .context_updates
                .get("parallel.success_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let fail_count = outcome
                .context_updates
                .get("parallel.fail_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            tracing::info!(
                run_id = %run_id,
                node = %node.id,
                success_count,
                fail_count,
                "parallel node completed"
            );
            emit(
                config,
                &mut sequence_no,
                RuntimeEventKind::Parallel(ParallelEvent::Completed {
                    run_id: run_id.clone(),
                    node_id: node.id.clone(),
                    success_count: success_count as usize,
                    failure_count: fail_count as usize,
                }),
            );

            apply_outcome(&mut state, node, &outcome);

            if outcome.status == NodeStatus::Fail {
                match route_after_fail(graph, node, &outcome, &state)? {
                    Some(target) => {
                        current = target;
                        continue;
                    }
                    None => {
                        return Err(AttractorError::Runtime(format!(
                            "parallel node '{}' failed with no fail route or retry target: {}",
                            node.id,
                            outcome.notes.clone().unwrap_or_default()
                        )));
                    }
                }
            }

            let fan_in = state
                .context
                .get("parallel.fan_in")
                .and_then(Value::as_str)
                .map(str::to_string);
            match fan_in {
                Some(target) => {
                    current = target;
                    continue;
                }
                None => {
                    mark_completed(&mut state, &current);
                    return Ok(RunResult {
                        state,
                        exit_node_id: current,
                    });
                }
            }
        }

        let policy = build_retry_policy(node, graph, config.backoff.clone());
        let (outcome, attempts_used) = execute_with_retry(
            node,
            graph,
            &state.context,
            config.executor.as_ref(),
            &policy,
            &run_id,
            &config.events,
            &mut sequence_no,
            config.outcomes.as_ref(),
        )
        .await?;
        state
            .node_retry_counts
            .insert(node.id.clone(), attempts_used.saturating_sub(1));
        apply_outcome(&mut state, node, &outcome);

        match decide_route(graph, node, &outcome, &state)? {
            RouteDecision::Next(target) => {
                current = target;
            }
            RouteDecision::TerminateSuccess => {
                mark_completed(&mut state, &current);
                emit(
                    config,
                    &mut sequence_no,
                    RuntimeEventKind::Pipeline(PipelineEvent::Completed {
                        run_id: run_id.clone(),
                        graph_id: graph.id.clone(),
                        lineage_attempt: 1,
                    }),
                );
                return Ok(RunResult {
                    state,
                    exit_node_id: current,
                });
            }
        }
    }
}

fn resolve_start_node(graph: &Graph) -> Result<&Node, AttractorError> {
    graph
        .start_candidates()
        .into_iter()
        .next()
        .ok_or_else(|| AttractorError::InvalidGraph("graph does not have a start node".to_string()))
}

fn is_terminal(graph: &Graph, node: &Node) -> bool {
    graph
        .terminal_candidates()
        .iter()
        .any(|candidate| candidate.id == node.id)
}

/// Converts a handler/executor error into a `NodeOutcome`, classifying it
/// retryable/non-retryable per the timeout/rate-limit/5xx heuristics (an
/// explicit `AttractorError::Handler { retryable, .. }` is trusted as-is).
fn outcome_for_thrown_error(node: &Node, error: AttractorError) -> NodeOutcome {
    let (message, retryable) = match &error {
        AttractorError::Handler {
            message, retryable, ..
        } => (message.clone(), *retryable),
        other => {
            let message = other.to_string();
            let retryable = is_retryable(&message, None);
            (message, retryable)
        }
    };

    if retryable {
        tracing::warn!(node = %node.id, error = %message, "handler error classified retryable");
        NodeOutcome {
            status: NodeStatus::Retry,
            notes: Some(message),
            context_updates: RuntimeContext::new(),
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            output: None,
        }
    } else {
        tracing::warn!(node = %node.id, error = %message, "handler error classified non-retryable");
        NodeOutcome::failure(message)
    }
}

fn mark_completed(state: &mut EngineState, node_id: &str) {
    if !state.completed_nodes.iter().any(|id| id == node_id) {
        state.completed_nodes.push(node_id.to_string());
    }
}

fn first_unsatisfied_goal_gate(
    graph: &Graph,
    node_outcomes: &BTreeMap<String, NodeOutcome>,
) -> Option<String> {
    for (node_id, outcome) in node_outcomes {
        let Some(node) = graph.nodes.get(node_id) else {
            continue;
        };
        if node.attrs.get_bool("goal_gate") == Some(true) && !outcome.status.is_success_like() {
            return Some(node_id.clone());
        }
    }
    None
}

/// Node-level `retry_target`/`fallback_retry_target`, falling back to the
/// graph-level equivalents, checked in that order.
fn resolve_retry_target(graph: &Graph, node_id: &str) -> Option<String> {
    if let Some(node) = graph.nodes.get(node_id) {
        for key in ["retry_target", "fallback_retry_target"] {
            let target = node.attrs.get_str(key).unwrap_or_default();
            if !target.is_empty() && graph.nodes.contains_key(target) {
                return Some(target.to_string());
            }
        }
    }

    for key in ["retry_target", "fallback_retry_target"] {
        let target = graph.attrs.get_str(key).unwrap_or_default();
        if !target.is_empty() && graph.nodes.contains_key(target) {
            return Some(target.to_string());
        }
    }

    None
}

enum RouteDecision {
    Next(String),
    TerminateSuccess,
}

fn decide_route(
    graph: &Graph,
    node: &Node,
    outcome: &NodeOutcome,
    state: &EngineState,
) -> Result<RouteDecision, AttractorError> {
    if outcome.status == NodeStatus::Fail {
        return match route_after_fail(graph, node, outcome, state)? {
            Some(target) => Ok(RouteDecision::Next(target)),
            None => Err(AttractorError::Runtime(format!(
                "node '{}' failed with no fail route or retry target: {}",
                node.id,
                outcome.notes.clone().unwrap_or_default()
            ))),
        };
    }

    let Some(edge) = select_next_edge(
        graph,
        &node.id,
        outcome,
        &state.context,
        &state.node_outputs,
        &state.parallel_outputs,
    ) else {
        tracing::debug!(node = %node.id, "no outgoing edge matched, terminating");
        return Ok(RouteDecision::TerminateSuccess);
    };
    if edge.attrs.get_bool("loop_restart") == Some(true) {
        return Err(AttractorError::structural(
            node.id.clone(),
            "loop_restart=true edges are not supported",
        ));
    }
    tracing::debug!(from = %node.id, to = %edge.to, "routed to next node");
    Ok(RouteDecision::Next(edge.to.clone()))
}

fn route_after_fail(
    graph: &Graph,
    node: &Node,
    outcome: &NodeOutcome,
    state: &EngineState,
) -> Result<Option<String>, AttractorError> {
    if let Some(edge) = select_fail_edge(
        graph,
        &node.id,
        outcome,
        &state.context,
        &state.node_outputs,
        &state.parallel_outputs,
    ) {
        if edge.attrs.get_bool("loop_restart") == Some(true) {
            return Err(AttractorError::structural(
                node.id.clone(),
                "loop_restart=true edges are not supported",
            ));
        }
        return Ok(Some(edge.to.clone()));
    }

    Ok(resolve_retry_target(graph, &node.id))
}

/// Shallow-merges `contextUpdates` into state, records the outcome, stores
/// non-empty output, promotes any `parallelOutputs.<id>` update into
/// `parallel_outputs`, and appends the node to `completedNodes` if absent.
fn apply_outcome(state: &mut EngineState, node: &Node, outcome: &NodeOutcome) {
    for (key, value) in &outcome.context_updates {
        if let Some(parallel_node_id) = key.strip_prefix("parallelOutputs.") {
            if let Value::Object(map) = value {
                let branch_outputs: BTreeMap<String, String> = map
                    .iter()
                    .filter_map(|(branch, value)| {
                        value.as_str().map(|text| (branch.clone(), text.to_string()))
                    })
                    .collect();
                state
                    .parallel_outputs
                    .insert(parallel_node_id.to_string(), branch_outputs);
            }
        }
        state.context.insert(key.clone(), value.clone());
    }

    state.context.insert(
        "outcome".to_string(),
        Value::String(outcome.status.as_str().to_string()),
    );
    if let Some(label) = &outcome.preferred_label {
        state
            .context
            .insert("preferred_label".to_string(), Value::String(label.clone()));
    }
    state.context.insert(
        "suggested_next_ids".to_string(),
        Value::Array(
            outcome
                .suggested_next_ids
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );
    state
        .context
        .insert("current_node".to_string(), Value::String(node.id.clone()));

    if let Some(output) = &outcome.output {
        if !output.is_empty() {
            state.node_outputs.insert(node.id.clone(), output.clone());
        }
    }

    state.node_outcomes.insert(node.id.clone(), outcome.clone());
    mark_completed(state, &node.id);
}

#[allow(clippy::too_many_arguments)]
async fn execute_with_retry(
    node: &Node,
    graph: &Graph,
    context: &RuntimeContext,
    executor: &dyn NodeExecutor,
    policy: &RetryPolicy,
    run_id: &str,
    events: &RuntimeEventSink,
    sequence_no: &mut u64,
    outcomes: &dyn OutcomeSink,
) -> Result<(NodeOutcome, u32), AttractorError> {
    for attempt in 1..=policy.max_attempts {
        tracing::debug!(run_id = %run_id, node = %node.id, attempt, "node execution started");
        emit_sink(
            events,
            sequence_no,
            RuntimeEventKind::Stage(StageEvent::Started {
                run_id: run_id.to_string(),
                node_id: node.id.clone(),
                stage_attempt_id: stage_attempt_id(node, attempt),
                attempt,
            }),
        );

        let outcome = match executor.execute(node, context, graph).await {
            Ok(outcome) => outcome,
            Err(error) => outcome_for_thrown_error(node, error),
        };
        outcomes
            .save_outcome(&node.id, outcome.status, &outcome, attempt)
            .await;

        if outcome.status.is_success_like() {
            tracing::info!(
                run_id = %run_id,
                node = %node.id,
                attempt,
                status = outcome.status.as_str(),
                "node execution completed"
            );
            emit_sink(
                events,
                sequence_no,
                RuntimeEventKind::Stage(StageEvent::Completed {
                    run_id: run_id.to_string(),
                    node_id: node.id.clone(),
                    stage_attempt_id: stage_attempt_id(node, attempt),
                    attempt,
                    status: outcome.status.as_str().to_string(),
                    notes: outcome.notes.clone(),
                }),
            );
            return Ok((outcome, attempt));
        }

        let will_retry = should_retry_outcome(&outcome) && attempt < policy.max_attempts;
        emit_sink(
            events,
            sequence_no,
            RuntimeEventKind::Stage(StageEvent::Failed {
                run_id: run_id.to_string(),
                node_id: node.id.clone(),
                stage_attempt_id: stage_attempt_id(node, attempt),
                attempt,
                status: outcome.status.as_str().to_string(),
                notes: outcome.notes.clone(),
                will_retry,
            }),
        );

        if will_retry {
            let delay_ms = delay_for_attempt_ms(attempt, &policy.backoff, hash_run_node(run_id, &node.id));
            tracing::warn!(
                run_id = %run_id,
                node = %node.id,
                attempt,
                next_attempt = attempt + 1,
                delay_ms,
                "node execution failed, retrying after backoff"
            );
            emit_sink(
                events,
                sequence_no,
                RuntimeEventKind::Stage(StageEvent::Retrying {
                    run_id: run_id.to_string(),
                    node_id: node.id.clone(),
                    stage_attempt_id: stage_attempt_id(node, attempt),
                    attempt,
                    next_attempt: attempt + 1,
                    delay_ms,
                }),
            );
            if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            continue;
        }

        if should_retry_outcome(&outcome) && attempt >= policy.max_attempts {
            return Ok((finalize_retry_exhausted(node, outcome.status), attempt));
        }
        return Ok((outcome, attempt));
    }

    Ok((
        NodeOutcome::failure("max retries exceeded"),
        policy.max_attempts,
    ))
}

fn stage_attempt_id(node: &Node, attempt: u32) -> String {
    format!("{}:attempt:{attempt}", node.id)
}

fn hash_run_node(run_id: &str, node_id: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in run_id.bytes().chain(node_id.bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn emit(config: &EngineConfig, sequence_no: &mut u64, kind: RuntimeEventKind) {
    emit_sink(&config.events, sequence_no, kind);
}

fn emit_sink(sink: &RuntimeEventSink, sequence_no: &mut u64, kind: RuntimeEventKind) {
    if !sink.is_enabled() {
        return;
    }
    *sequence_no += 1;
    sink.emit(RuntimeEvent {
        sequence_no: *sequence_no,
        timestamp: now_timestamp(),
        kind,
    });
}

fn now_timestamp() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}Z", since_epoch.as_secs(), since_epoch.subsec_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_dot;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripts a fixed sequence of statuses per node id; the last scripted
    /// status repeats once the script is exhausted.
    struct ScriptedExecutor {
        scripts: BTreeMap<String, Vec<NodeStatus>>,
        calls: Mutex<BTreeMap<String, usize>>,
    }

    impl ScriptedExecutor {
        fn new(scripts: Vec<(&str, Vec<NodeStatus>)>) -> Self {
            Self {
                scripts: scripts
                    .into_iter()
                    .map(|(id, statuses)| (id.to_string(), statuses))
                    .collect(),
                calls: Mutex::new(BTreeMap::new()),
            }
        }
    }

    #[async_trait]
    impl NodeExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            node: &Node,
            _context: &RuntimeContext,
            _graph: &Graph,
        ) -> Result<NodeOutcome, AttractorError> {
            let mut calls = self.calls.lock().expect("calls mutex should lock");
            let call_index = *calls.entry(node.id.clone()).and_modify(|n| *n += 1).or_insert(0);
            let script = self
                .scripts
                .get(&node.id)
                .cloned()
                .unwrap_or_else(|| vec![NodeStatus::Success]);
            let status = script[call_index.min(script.len() - 1)];
            Ok(match status {
                NodeStatus::Success => NodeOutcome::success(),
                NodeStatus::Fail => NodeOutcome::failure("scripted failure"),
                NodeStatus::Retry => NodeOutcome::retry("scripted retry"),
                NodeStatus::PartialSuccess | NodeStatus::Skipped => NodeOutcome {
                    status,
                    notes: None,
                    context_updates: RuntimeContext::new(),
                    preferred_label: None,
                    suggested_next_ids: Vec::new(),
                    output: None,
                },
            })
        }
    }

    fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("attractor=debug")
            .try_init();
    }

    fn config_with(executor: Arc<dyn NodeExecutor>) -> EngineConfig {
        EngineConfig {
            executor,
            backoff: RetryBackoffConfig {
                initial_delay_ms: 0,
                backoff_factor: 2.0,
                max_delay_ms: 0,
                jitter: false,
            },
            ..EngineConfig::default()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_linear_two_node_graph_expected_terminates_at_done_with_no_retries() {
        let graph = parse_dot(
            r#"
            digraph G {
                start [shape=Mdiamond]
                done [shape=Msquare]
                start -> done
            }
            "#,
        )
        .expect("graph should parse");
        let config = config_with(Arc::new(ScriptedExecutor::new(vec![])));

        let result = run(&graph, &config, EngineState::new(), None)
            .await
            .expect("run should succeed");

        assert_eq!(result.exit_node_id, "done");
        assert_eq!(result.state.completed_nodes, vec!["start", "done"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_retry_then_success_expected_two_attempts_recorded() {
        let graph = parse_dot(
            r#"
            digraph G {
                start [shape=Mdiamond]
                a [max_retries=2]
                exit [shape=Msquare]
                start -> a -> exit
            }
            "#,
        )
        .expect("graph should parse");
        let config = config_with(Arc::new(ScriptedExecutor::new(vec![(
            "a",
            vec![NodeStatus::Retry, NodeStatus::Success],
        )])));

        let result = run(&graph, &config, EngineState::new(), None)
            .await
            .expect("run should succeed");

        assert_eq!(result.exit_node_id, "exit");
        assert_eq!(result.state.node_retry_counts.get("a"), Some(&1));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_fail_with_fail_route_expected_reaches_exit_via_b() {
        let graph = parse_dot(
            r#"
            digraph G {
                start [shape=Mdiamond]
                a [max_retries=0]
                b
                c
                exit [shape=Msquare]
                start -> a
                a -> b [condition="context.outcome == \"fail\""]
                a -> c
                b -> exit
                c -> exit
            }
            "#,
        )
        .expect("graph should parse");
        let config = config_with(Arc::new(ScriptedExecutor::new(vec![("a", vec![NodeStatus::Fail])])));

        let result = run(&graph, &config, EngineState::new(), None)
            .await
            .expect("run should succeed");

        assert_eq!(result.exit_node_id, "exit");
        assert!(result.state.completed_nodes.contains(&"b".to_string()));
        assert!(!result.state.completed_nodes.contains(&"c".to_string()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_parallel_wait_all_partial_expected_partial_success_counts() {
        // "y" is a bare tool node with no tool/command attrs, which ToolHandler
        // deterministically fails on; "x" is a codergen node, which always
        // succeeds via the registry's default simulated backend.
        let graph = parse_dot(
            r#"
            digraph G {
                start [shape=Mdiamond]
                p [shape=component]
                x [shape=box]
                y [shape=parallelogram]
                fi [shape=tripleoctagon]
                exit [shape=Msquare]
                start -> p
                p -> x
                p -> y
                x -> fi
                y -> fi
                fi -> exit
            }
            "#,
        )
        .expect("graph should parse");
        let config = EngineConfig::default();

        let result = run(&graph, &config, EngineState::new(), None)
            .await
            .expect("run should succeed");

        assert_eq!(result.exit_node_id, "exit");
        let outcome = result.state.node_outcomes.get("p").expect("p should have run");
        assert_eq!(outcome.status, NodeStatus::PartialSuccess);
        assert_eq!(
            result.state.context.get("parallel.success_count"),
            Some(&Value::from(1u64))
        );
        assert_eq!(
            result.state.context.get("parallel.fail_count"),
            Some(&Value::from(1u64))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_human_gate_auto_approve_expected_routes_to_first_choice() {
        let graph = parse_dot(
            r#"
            digraph G {
                start [shape=Mdiamond]
                gate [shape=hexagon]
                n1
                n2
                exit [shape=Msquare]
                start -> gate
                gate -> n1 [label="[A] yes"]
                gate -> n2 [label="[B] no"]
                n1 -> exit
                n2 -> exit
            }
            "#,
        )
        .expect("graph should parse");
        let config = EngineConfig::default();

        let result = run(&graph, &config, EngineState::new(), None)
            .await
            .expect("run should succeed");

        assert_eq!(result.exit_node_id, "exit");
        assert!(result.state.completed_nodes.contains(&"n1".to_string()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_goal_gate_retry_expected_redirects_then_succeeds() {
        let graph = parse_dot(
            r#"
            digraph G {
                start [shape=Mdiamond]
                q_pre
                q [goal_gate=true, max_retries=0]
                exit [shape=Msquare]
                graph [retry_target=q_pre]
                start -> q_pre -> q -> exit
            }
            "#,
        )
        .expect("graph should parse");
        let config = config_with(Arc::new(ScriptedExecutor::new(vec![(
            "q",
            vec![NodeStatus::Fail, NodeStatus::Success],
        )])));

        let result = run(&graph, &config, EngineState::new(), None)
            .await
            .expect("run should succeed");

        assert_eq!(result.exit_node_id, "exit");
        let outcome = result.state.node_outcomes.get("q").expect("q should have run");
        assert_eq!(outcome.status, NodeStatus::Success);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_goal_gate_unsatisfied_at_exit_expected_redirect_event_then_success() {
        init_test_tracing();
        // q's own fail edge leads straight to `exit` (no generic retry-target
        // fallback involved in routing away from q), so the unsatisfied gate
        // is caught by the exit-time check rather than by normal fail-routing.
        let graph = parse_dot(
            r#"
            digraph G {
                graph [retry_target=q_fix]
                start [shape=Mdiamond]
                q [goal_gate=true, max_retries=0]
                q_fix
                exit [shape=Msquare]
                start -> q
                start -> q_fix
                q -> exit [condition="context.outcome == \"fail\""]
                q -> exit
                q_fix -> q
            }
            "#,
        )
        .expect("graph should parse");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer_seen = Arc::clone(&seen);
        let observer: crate::events::SharedRuntimeEventObserver =
            Arc::new(move |event: &RuntimeEvent| {
                observer_seen
                    .lock()
                    .expect("observer mutex should lock")
                    .push(event.kind.clone());
            });
        let config = EngineConfig {
            events: RuntimeEventSink::default().observer(observer),
            ..config_with(Arc::new(ScriptedExecutor::new(vec![(
                "q",
                vec![NodeStatus::Fail, NodeStatus::Success],
            )])))
        };

        let result = run(&graph, &config, EngineState::new(), None)
            .await
            .expect("run should succeed");

        assert_eq!(result.exit_node_id, "exit");
        assert!(
            result.state.completed_nodes.iter().any(|id| id == "q_fix"),
            "the goal-gate retry target should only be visited via the exit-time redirect"
        );
        let redirected = seen.lock().expect("seen mutex should lock").iter().any(|kind| {
            matches!(
                kind,
                RuntimeEventKind::GoalGate(GoalGateEvent::Redirected { node_id, retry_target, .. })
                    if node_id == "q" && retry_target == "q_fix"
            )
        });
        assert!(redirected, "expected a GoalGateEvent::Redirected(q -> q_fix)");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_step_budget_exceeded_expected_fatal_error() {
        let graph = parse_dot(
            r#"
            digraph G {
                start [shape=Mdiamond]
                a
                exit [shape=Msquare]
                start -> a
                a -> a [weight=10]
                a -> exit
            }
            "#,
        )
        .expect("graph should parse");
        let mut config = config_with(Arc::new(ScriptedExecutor::new(vec![])));
        config.max_steps = 5;

        let error = run(&graph, &config, EngineState::new(), None)
            .await
            .expect_err("run should hit the step budget");
        assert!(matches!(error, AttractorError::StepBudgetExceeded { .. }));
    }
}
