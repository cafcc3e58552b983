use crate::condition_lang::{self, EvalScope};
use crate::{Edge, Graph, NodeOutcome, RuntimeContext};
use std::collections::BTreeMap;

pub fn select_next_edge<'a>(
    graph: &'a Graph,
    from_node_id: &'a str,
    outcome: &NodeOutcome,
    context: &RuntimeContext,
    node_outputs: &BTreeMap<String, String>,
    parallel_outputs: &BTreeMap<String, BTreeMap<String, String>>,
) -> Option<&'a Edge> {
    let edges: Vec<&Edge> = graph.outgoing_edges(from_node_id).collect();
    if edges.is_empty() {
        return None;
    }

    let scope = EvalScope {
        context,
        node_outputs,
        parallel_outputs,
    };
    let condition_holds = |edge: &Edge| -> bool {
        let condition = edge.attrs.get_str("condition").unwrap_or_default().trim();
        if condition.is_empty() {
            return false;
        }
        condition_lang::evaluate(condition, &scope).unwrap_or(false)
    };
    let condition_empty = |edge: &Edge| -> bool {
        edge.attrs
            .get_str("condition")
            .unwrap_or_default()
            .trim()
            .is_empty()
    };

    // Step 1: condition match
    let condition_matched: Vec<&Edge> = edges.iter().copied().filter(|e| condition_holds(e)).collect();
    if !condition_matched.is_empty() {
        return best_by_weight_then_lexical(condition_matched);
    }

    // Eligible for steps 2 and 3: unconditional or condition evaluates true
    let eligible: Vec<&Edge> = edges
        .iter()
        .copied()
        .filter(|e| condition_empty(e) || condition_holds(e))
        .collect();

    // Step 2: preferred label
    if let Some(preferred) = outcome.preferred_label.as_ref() {
        let preferred = normalize_label(preferred);
        if let Some(edge) = eligible.iter().find(|edge| {
            normalize_label(edge.attrs.get_str("label").unwrap_or_default()) == preferred
        }) {
            return Some(*edge);
        }
    }

    // Step 3: suggested next ids
    if !outcome.suggested_next_ids.is_empty() {
        for suggested in &outcome.suggested_next_ids {
            if let Some(edge) = eligible.iter().find(|edge| edge.to == *suggested) {
                return Some(*edge);
            }
        }
    }

    // Step 4/5: unconditional by weight then lexical
    let unconditional: Vec<&Edge> = edges.iter().copied().filter(|e| condition_empty(e)).collect();
    if !unconditional.is_empty() {
        return best_by_weight_then_lexical(unconditional);
    }

    // Fallback: any edge by weight then lexical
    best_by_weight_then_lexical(edges)
}

/// Condition evaluation for a FAILed outcome: only step 1 (condition match) applies.
pub fn select_fail_edge<'a>(
    graph: &'a Graph,
    from_node_id: &'a str,
    outcome: &NodeOutcome,
    context: &RuntimeContext,
    node_outputs: &BTreeMap<String, String>,
    parallel_outputs: &BTreeMap<String, BTreeMap<String, String>>,
) -> Option<&'a Edge> {
    let _ = outcome;
    let scope = EvalScope {
        context,
        node_outputs,
        parallel_outputs,
    };
    let matched: Vec<&Edge> = graph
        .outgoing_edges(from_node_id)
        .filter(|edge| {
            let condition = edge.attrs.get_str("condition").unwrap_or_default().trim();
            !condition.is_empty() && condition_lang::evaluate(condition, &scope).unwrap_or(false)
        })
        .collect();
    best_by_weight_then_lexical(matched)
}

fn best_by_weight_then_lexical<'a>(edges: Vec<&'a Edge>) -> Option<&'a Edge> {
    edges.into_iter().max_by(|left, right| {
        edge_weight(left)
            .cmp(&edge_weight(right))
            .then_with(|| right.to.cmp(&left.to))
    })
}

fn edge_weight(edge: &Edge) -> i64 {
    edge.attrs
        .get("weight")
        .and_then(|value| value.as_i64())
        .unwrap_or(0)
}

fn normalize_label(input: &str) -> String {
    let trimmed = input.trim().to_ascii_lowercase();

    if trimmed.starts_with('[') {
        if let Some((_, rest)) = trimmed.split_once(']') {
            return rest.trim().to_string();
        }
    }

    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphanumeric() && bytes[1] == b')' {
        return trimmed[2..].trim().to_string();
    }

    if bytes.len() >= 3 && bytes[0].is_ascii_alphanumeric() && bytes[1] == b' ' && bytes[2] == b'-'
    {
        return trimmed[3..].trim().to_string();
    }

    trimmed
}
