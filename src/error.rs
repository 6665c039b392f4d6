use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Task error: {0}")]
    Task(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Serialization(_) => -8,
            Error::SourceUnavailable(_) => -14,
            Error::Config(_) => -13,
            Error::Cancelled => -16,
            Error::Timeout(_) => -15,
            Error::Task(_) => -99,
        }
    }
}

/// Failure reported by a workload or sample collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The collaborator cannot be reached at all; the run must abort.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A single request failed; the item is treated as unknown.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A single record could not be decoded.
    #[error("malformed record: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        Error::SourceUnavailable(err.to_string())
    }
}
