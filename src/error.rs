use thiserror::Error;

/// Crate-wide error type. Every variant maps to exactly one protocol error
/// code via [`Error::code`] so the server never invents a code ad hoc.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid agent name: {0}")]
    InvalidAgent(String),

    #[error("invalid topic name: {0}")]
    InvalidTopic(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown project id: {0}")]
    ProjectNotFound(String),

    #[error("project id mismatch: expected {expected}, got {got}")]
    ProjectMismatch { expected: String, got: String },

    #[error("invalid project: {0}")]
    InvalidProject(String),

    #[error("message too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("subscriber terminated: backpressure")]
    Backpressure,

    #[error("id allocator exhausted retries")]
    IdCollision,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The protocol `error.code` string from spec §7.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidAgent(_) => "invalid_agent",
            Error::InvalidTopic(_) => "invalid_topic",
            Error::InvalidRequest(_) => "invalid_request",
            Error::ProjectNotFound(_) => "project_not_found",
            Error::ProjectMismatch { .. } => "project_mismatch",
            Error::InvalidProject(_) => "invalid_project",
            Error::TooLarge { .. } => "too_large",
            Error::Backpressure => "backpressure",
            Error::Io(_) | Error::Json(_) | Error::IdCollision | Error::Internal(_) => "internal",
        }
    }

    /// Whether a client may usefully retry the request as-is.
    pub fn retryable(&self) -> bool {
        matches!(self, Error::Backpressure)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
