use std::path::PathBuf;
use std::time::Duration;

/// Failure taxonomy shared by every pipeline boundary.
///
/// `Upstream` carries opaque collaborator failures (HTTP, decoding, I/O) as-is;
/// the other variants are raised by this workspace's own checks.
#[derive(Debug, thiserror::Error)]
pub enum PromoError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{operation} timed out after {:.1}s", .waited.as_secs_f64())]
    Timeout { operation: String, waited: Duration },

    #[error("required tool not available: {0}")]
    ToolMissing(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("chain contract violated: {0}")]
    Chain(String),

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

pub type PromoResult<T> = Result<T, PromoError>;

impl PromoError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable snake_case label used in run events and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::Config(_) => "config",
            Self::NotFound(_) => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::ToolMissing(_) => "tool_missing",
            Self::Forbidden(_) => "forbidden",
            Self::Chain(_) => "chain",
            Self::Upstream(_) => "upstream",
        }
    }

    /// Errors the person filling in the request can fix themselves.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, Self::MissingField(_) | Self::NotFound(_))
    }
}
