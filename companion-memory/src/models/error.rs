#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Invalid owner id: {0}")]
    InvalidOwnerId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("LLM error: {0}")]
    Llm(#[from] companion_llm::LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MemoryError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn archive(err: impl std::fmt::Display) -> Self {
        Self::Archive(err.to_string())
    }

    pub fn index(err: impl std::fmt::Display) -> Self {
        Self::Index(err.to_string())
    }

    pub fn job(err: impl std::fmt::Display) -> Self {
        Self::Job(err.to_string())
    }

    /// Transient failures that a caller may retry as a whole.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Archive(_) | Self::Index(_) | Self::Io(_) => true,
            Self::Llm(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;
