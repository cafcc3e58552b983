use crate::interviewer::{
    AutoApproveInterviewer, HumanAnswer, HumanChoice, HumanQuestion, HumanQuestionType,
    Interviewer,
};
use crate::{
    AttractorError, Graph, Node, NodeOutcome, NodeStatus, RuntimeContext, handlers::NodeHandler,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct WaitHumanHandler {
    interviewer: Arc<dyn Interviewer>,
}

impl WaitHumanHandler {
    pub fn new(interviewer: Arc<dyn Interviewer>) -> Self {
        Self { interviewer }
    }
}

impl Default for WaitHumanHandler {
    fn default() -> Self {
        Self::new(Arc::new(AutoApproveInterviewer))
    }
}

#[async_trait]
impl NodeHandler for WaitHumanHandler {
    async fn execute(
        &self,
        node: &Node,
        _context: &RuntimeContext,
        graph: &Graph,
    ) -> Result<NodeOutcome, AttractorError> {
        let choices = derive_choices(node, graph);
        if choices.is_empty() {
            return Ok(NodeOutcome::failure("No outgoing edges for human gate"));
        }

        let text = node
            .attrs
            .get_str("prompt")
            .or_else(|| node.attrs.get_str("label"))
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("Select an option:")
            .to_string();

        let question = HumanQuestion {
            stage: node.id.clone(),
            text,
            question_type: HumanQuestionType::MultipleChoice,
            choices: choices.clone(),
            default_choice: node
                .attrs
                .get_str("human.default_choice")
                .map(ToOwned::to_owned),
            timeout: parse_timeout(node),
        };

        let answer = self.interviewer.ask(question).await;
        let selected = match resolve_selection(&answer, &choices, node) {
            Ok(choice) => choice,
            Err(outcome) => return Ok(outcome),
        };

        let mut updates = RuntimeContext::new();
        updates.insert(
            "human.gate.selected".to_string(),
            Value::String(selected.key.clone()),
        );
        updates.insert(
            "human.gate.label".to_string(),
            Value::String(selected.label.clone()),
        );
        updates.insert(
            "human.gate.target".to_string(),
            Value::String(selected.to_node.clone()),
        );

        Ok(NodeOutcome {
            status: NodeStatus::Success,
            notes: Some(format!("human selected {}", selected.key)),
            context_updates: updates,
            preferred_label: Some(selected.label.clone()),
            suggested_next_ids: vec![selected.to_node.clone()],
            output: Some(selected.label.clone()),
        })
    }
}

/// Maps an interviewer's answer onto one of the gate's enumerated choices, per
/// the human-gate resolution rules: timeout/skip fall back to `default_choice`
/// or a retry, everything else matches by key/label/target or the first choice.
fn resolve_selection(
    answer: &HumanAnswer,
    choices: &[HumanChoice],
    node: &Node,
) -> Result<HumanChoice, NodeOutcome> {
    match answer {
        HumanAnswer::Timeout | HumanAnswer::Skipped => default_choice(node, choices).ok_or_else(|| NodeOutcome {
            status: NodeStatus::Retry,
            notes: Some("human gate timeout with no default choice".to_string()),
            context_updates: RuntimeContext::new(),
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            output: None,
        }),
        HumanAnswer::Selected(raw) => {
            Ok(find_choice(choices, raw).unwrap_or_else(|| choices[0].clone()))
        }
        HumanAnswer::FreeText(raw) => {
            Ok(find_choice(choices, raw).unwrap_or_else(|| choices[0].clone()))
        }
        HumanAnswer::Yes => Ok(find_choice(choices, "yes")
            .or_else(|| find_choice(choices, "y"))
            .unwrap_or_else(|| choices[0].clone())),
        HumanAnswer::No => Ok(find_choice(choices, "no")
            .or_else(|| find_choice(choices, "n"))
            .unwrap_or_else(|| choices[0].clone())),
    }
}

fn default_choice(node: &Node, choices: &[HumanChoice]) -> Option<HumanChoice> {
    node.attrs
        .get_str("human.default_choice")
        .and_then(|raw| find_choice(choices, raw))
}

fn parse_timeout(node: &Node) -> Option<Duration> {
    let millis = node.attrs.get("timeout").and_then(crate::AttrValue::as_duration_millis)?;
    Some(Duration::from_millis(millis))
}

fn derive_choices(node: &Node, graph: &Graph) -> Vec<HumanChoice> {
    graph
        .outgoing_edges(&node.id)
        .map(|edge| {
            let label = edge
                .attrs
                .get_str("label")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(&edge.to)
                .to_string();
            HumanChoice {
                key: parse_accelerator_key(&label),
                label,
                to_node: edge.to.clone(),
            }
        })
        .collect()
}

fn parse_accelerator_key(label: &str) -> String {
    let trimmed = label.trim();
    if let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|raw| raw.split_once(']'))
    {
        let key = inner.0.trim();
        if !key.is_empty() {
            return key.to_ascii_uppercase();
        }
    }
    if let Some((left, _)) = trimmed.split_once(')') {
        let key = left.trim();
        if key.len() == 1 {
            return key.to_ascii_uppercase();
        }
    }
    if let Some((left, _)) = trimmed.split_once('-') {
        let key = left.trim();
        if key.len() == 1 {
            return key.to_ascii_uppercase();
        }
    }
    trimmed
        .chars()
        .next()
        .map(|ch| ch.to_ascii_uppercase().to_string())
        .unwrap_or_else(|| "X".to_string())
}

fn find_choice(choices: &[HumanChoice], raw: &str) -> Option<HumanChoice> {
    let needle = raw.trim().to_ascii_lowercase();
    choices
        .iter()
        .find(|choice| {
            choice.key.to_ascii_lowercase() == needle
                || choice.label.to_ascii_lowercase() == needle
                || choice.to_node.to_ascii_lowercase() == needle
        })
        .cloned()
}
