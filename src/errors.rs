use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("TRANSPORT_FAILURE: {0}")]
    Transport(String),
    #[error("EMPTY_RESPONSE: {0}")]
    EmptyResponse(String),
    #[error("RESPONSE_TRUNCATED: {0}")]
    Truncated(String),
    #[error("PARSE_FAILURE: {0}")]
    Parse(String),
    #[error("SCHEMA_INVALID: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("GENERATION_FAILED after {attempts} attempt(s): {cause}")]
    GenerationFailed { attempts: u32, cause: Box<AppError> },
    #[error("MIGRATION_FAILED: {0}")]
    Migration(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Failures of a single generation attempt that warrant another try.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::EmptyResponse(_) | Self::Truncated(_) | Self::Parse(_) | Self::Schema(_)
        )
    }

    /// Innermost cause, looking through a terminal generation failure.
    pub fn root_cause(&self) -> &AppError {
        match self {
            Self::GenerationFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.without_url().to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
