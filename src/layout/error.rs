use serde::Serialize;
use thiserror::Error;

use super::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One problem found while decoding or validating host input.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationIssue {
    #[error("nodes must be an array")]
    NodesNotArray,
    #[error("edges must be an array")]
    EdgesNotArray,
    #[error("node set is empty")]
    EmptyNodeSet,
    #[error("node at index {index} has no usable id")]
    MissingNodeId { index: usize },
    #[error("edge at index {index} is missing a source or target")]
    MissingEndpoint { index: usize },
    #[error("duplicate node id `{id}`")]
    DuplicateNodeId { id: String },
    #[error("edge `{edge}` references missing source `{node}`")]
    DanglingSource { edge: String, node: String },
    #[error("edge `{edge}` references missing target `{node}`")]
    DanglingTarget { edge: String, node: String },
    #[error("node `{id}` uses the reserved virtual type")]
    ReservedNodeType { id: String },
    #[error("node `{id}` uses the reserved virtual id prefix")]
    ReservedNodeId { id: String },
    #[error("field `{field}` of `{id}` is not numeric and was coerced")]
    CoercedField { id: String, field: &'static str },
}

impl ValidationIssue {
    pub fn severity(&self) -> Severity {
        match self {
            Self::CoercedField { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }
}

/// Failure surfaced in a [`super::LayoutResult`]. Never propagated past the
/// executor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    #[error("input failed validation with {} issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),
    #[error("layout timed out during {phase} after {elapsed_ms} ms (limit {limit_ms} ms)")]
    Timeout {
        phase: Phase,
        limit_ms: u64,
        elapsed_ms: u64,
    },
    #[error("a layout is already in progress")]
    InProgress,
    #[error("{phase} panicked: {message}")]
    Panicked { phase: Phase, message: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LayoutError {
    /// Stable machine-readable tag for hosts and dumps.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Timeout { .. } => "timeout",
            Self::InProgress => "in_progress",
            Self::Panicked { .. } => "panicked",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}
