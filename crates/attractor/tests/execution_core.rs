use async_trait::async_trait;
use attractor::{
    AttractorError, EngineConfig, EngineState, Graph, Node, NodeExecutor, NodeOutcome, NodeStatus,
    RuntimeContext, parse_dot,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn parse(source: &str) -> Graph {
    parse_dot(source).expect("graph should parse")
}

fn zero_delay_config(executor: Arc<dyn NodeExecutor>) -> EngineConfig {
    EngineConfig {
        executor,
        backoff: attractor::RetryBackoffConfig {
            initial_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: 0,
            jitter: false,
        },
        ..EngineConfig::default()
    }
}

struct PreferredNoExecutor;

#[async_trait]
impl NodeExecutor for PreferredNoExecutor {
    async fn execute(
        &self,
        node: &Node,
        _context: &RuntimeContext,
        _graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        if node.id == "gate" {
            return Ok(NodeOutcome {
                status: NodeStatus::Success,
                notes: None,
                context_updates: RuntimeContext::new(),
                preferred_label: Some("No".to_string()),
                suggested_next_ids: vec![],
                output: None,
            });
        }
        Ok(NodeOutcome::success())
    }
}

struct RetryOnceExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl NodeExecutor for RetryOnceExecutor {
    async fn execute(
        &self,
        node: &Node,
        _context: &RuntimeContext,
        _graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        if node.id == "work" {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                return Ok(NodeOutcome {
                    status: NodeStatus::Retry,
                    notes: Some("retry".to_string()),
                    context_updates: RuntimeContext::new(),
                    preferred_label: None,
                    suggested_next_ids: vec![],
                    output: None,
                });
            }
        }
        Ok(NodeOutcome::success())
    }
}

struct GoalGateExecutor {
    work_calls: AtomicUsize,
}

#[async_trait]
impl NodeExecutor for GoalGateExecutor {
    async fn execute(
        &self,
        node: &Node,
        _context: &RuntimeContext,
        _graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        if node.id == "work" {
            let attempt = self.work_calls.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                return Ok(NodeOutcome::failure("goal not met"));
            }
        }
        Ok(NodeOutcome::success())
    }
}

#[tokio::test(flavor = "current_thread")]
async fn execution_linear_graph_expected_all_nodes_completed_in_order() {
    let graph = parse(
        r#"
        digraph G {
            start [shape=Mdiamond]
            plan [shape=box, prompt="Plan"]
            exit [shape=Msquare]
            start -> plan -> exit
        }
        "#,
    );
    let config = EngineConfig::default();
    let result = attractor::engine::run(&graph, &config, EngineState::new(), None)
        .await
        .expect("run should succeed");

    assert_eq!(result.exit_node_id, "exit");
    assert_eq!(result.state.completed_nodes, vec!["start", "plan", "exit"]);
}

#[tokio::test(flavor = "current_thread")]
async fn execution_branching_preferred_label_expected_no_branch() {
    let graph = parse(
        r#"
        digraph G {
            start [shape=Mdiamond]
            gate [shape=diamond]
            yes
            no
            exit [shape=Msquare]
            start -> gate
            gate -> yes [label="Yes"]
            gate -> no [label="No"]
            yes -> exit
            no -> exit
        }
        "#,
    );

    let config = zero_delay_config(Arc::new(PreferredNoExecutor));
    let result = attractor::engine::run(&graph, &config, EngineState::new(), None)
        .await
        .expect("run should succeed");

    assert!(result.state.completed_nodes.iter().any(|n| n == "no"));
    assert!(!result.state.completed_nodes.iter().any(|n| n == "yes"));
}

#[tokio::test(flavor = "current_thread")]
async fn execution_retry_then_success_expected_attempts_observed() {
    let graph = parse(
        r#"
        digraph G {
            start [shape=Mdiamond]
            work [max_retries=1]
            exit [shape=Msquare]
            start -> work -> exit
        }
        "#,
    );

    let executor = Arc::new(RetryOnceExecutor {
        calls: AtomicUsize::new(0),
    });
    let config = zero_delay_config(executor.clone());
    let result = attractor::engine::run(&graph, &config, EngineState::new(), None)
        .await
        .expect("run should succeed");

    assert_eq!(result.exit_node_id, "exit");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn execution_goal_gate_retry_target_expected_recovery_before_exit() {
    let graph = parse(
        r#"
        digraph G {
            start [shape=Mdiamond]
            work [goal_gate=true, max_retries=0]
            fix
            exit [shape=Msquare]
            start -> work -> exit
            work -> fix [condition="context.outcome == \"fail\""]
            fix -> work
        }
        "#,
    );

    let executor = Arc::new(GoalGateExecutor {
        work_calls: AtomicUsize::new(0),
    });
    let config = zero_delay_config(executor);
    let result = attractor::engine::run(&graph, &config, EngineState::new(), None)
        .await
        .expect("run should succeed");

    assert_eq!(result.exit_node_id, "exit");
    assert!(result.state.completed_nodes.iter().any(|n| n == "fix"));
}
