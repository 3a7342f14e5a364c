use serde::Serialize;
use thiserror::Error;

/// Which collaborator a read went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    StaticIndex,
    FlowGraph,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::StaticIndex => f.write_str("static index"),
            SourceKind::FlowGraph => f.write_str("flow graph"),
        }
    }
}

/// Typed failures of a validation request.
///
/// "No answer" outcomes (unresolved root, unreachable target, truncated
/// traversal) are not errors; they are reported in the verdict.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("flow {flow_key} not found in flow graph")]
    FlowNotFound { flow_key: String },

    #[error("flow {flow_key} has no participant that starts the flow")]
    NoRootFound { flow_key: String },

    #[error("{source_kind} unavailable: {cause:#}")]
    SourceUnavailable {
        source_kind: SourceKind,
        cause: anyhow::Error,
    },

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl ValidateError {
    pub fn index_unavailable(cause: anyhow::Error) -> Self {
        ValidateError::SourceUnavailable {
            source_kind: SourceKind::StaticIndex,
            cause,
        }
    }

    pub fn flow_graph_unavailable(cause: anyhow::Error) -> Self {
        ValidateError::SourceUnavailable {
            source_kind: SourceKind::FlowGraph,
            cause,
        }
    }

    /// Stable machine-readable kind, used by the RPC layer.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidateError::FlowNotFound { .. } => "flow_not_found",
            ValidateError::NoRootFound { .. } => "no_root_found",
            ValidateError::SourceUnavailable { .. } => "source_unavailable",
            ValidateError::InvalidOptions(_) => "invalid_options",
        }
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        match self {
            ValidateError::SourceUnavailable { source_kind, .. } => Some(*source_kind),
            _ => None,
        }
    }
}

pub type ValidateResult<T> = std::result::Result<T, ValidateError>;
