use crate::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttractorError {
    #[error("DOT parse error: {0}")]
    DotParse(String),
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("stylesheet parse error: {0}")]
    StylesheetParse(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no handler configured for node '{node_id}' of type '{handler_type}'")]
    Config {
        node_id: String,
        handler_type: String,
    },
    #[error("handler for node '{node_id}' failed: {message}")]
    Handler {
        node_id: String,
        message: String,
        retryable: bool,
    },
    #[error("structural error at node '{node_id}': {message}")]
    Structural { node_id: String, message: String },
    #[error("goal gate '{node_id}' unsatisfied with no resolvable retry target")]
    GoalGateUnsatisfied { node_id: String },
    #[error("step budget of {max_steps} exceeded at node '{node_id}'")]
    StepBudgetExceeded { node_id: String, max_steps: u32 },
    #[error("run cancelled at node '{node_id}'")]
    Cancelled { node_id: String },
}

impl AttractorError {
    pub fn structural(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Structural {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    pub fn config(node_id: impl Into<String>, handler_type: impl Into<String>) -> Self {
        Self::Config {
            node_id: node_id.into(),
            handler_type: handler_type.into(),
        }
    }

    pub fn handler(node_id: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Handler {
            node_id: node_id.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Node id carried by error variants that are anchored to one node, when present.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::Config { node_id, .. }
            | Self::Handler { node_id, .. }
            | Self::Structural { node_id, .. }
            | Self::GoalGateUnsatisfied { node_id }
            | Self::StepBudgetExceeded { node_id, .. }
            | Self::Cancelled { node_id } => Some(node_id),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone)]
#[error("validation failed with {errors_count} error(s)")]
pub struct ValidationError {
    pub diagnostics: Vec<Diagnostic>,
    pub errors_count: usize,
}

impl ValidationError {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        let errors_count = diagnostics.iter().filter(|d| d.is_error()).count();
        Self {
            diagnostics,
            errors_count,
        }
    }
}

/// Classifies a handler-raised error message (and optional HTTP-style status) as
/// retryable per the timeout/rate-limit/5xx heuristics used across handler attempts.
pub fn is_retryable(message: &str, status: Option<u16>) -> bool {
    if let Some(status) = status {
        if status == 429 || (500..600).contains(&status) {
            return true;
        }
        if (400..500).contains(&status) {
            return false;
        }
    }

    let lowered = message.to_ascii_lowercase();
    const NEEDLES: [&str; 6] = [
        "timeout",
        "temporar",
        "econnreset",
        "connection reset",
        "rate limit",
        "429",
    ];
    NEEDLES.iter().any(|needle| lowered.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_retryable_timeout_message_expected_true() {
        assert!(is_retryable("Request timeout while calling upstream", None));
    }

    #[test]
    fn is_retryable_status_5xx_expected_true() {
        assert!(is_retryable("internal error", Some(503)));
    }

    #[test]
    fn is_retryable_status_4xx_non_429_expected_false() {
        assert!(!is_retryable("bad request", Some(400)));
    }

    #[test]
    fn is_retryable_unrelated_message_expected_false() {
        assert!(!is_retryable("invalid syntax", None));
    }
}
