use thiserror::Error;
use time::OffsetDateTime;

pub type Result<T> = std::result::Result<T, RankError>;

/// Coarse classification used to pick a handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    DataIntegrity,
    ResourceUnavailable,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum RankError {
    #[error("model needs 2 or more documents to build, found {found}")]
    InsufficientData { found: usize },

    #[error("window start {start} must be before window end {end}")]
    InvalidWindow { start: OffsetDateTime, end: OffsetDateTime },

    #[error("data integrity violated for {subject}: {detail}")]
    DataIntegrity { subject: String, detail: String },

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("resource unavailable: {0}")]
    Unavailable(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("ranker for partition {partition} has halted")]
    Halted { partition: String },

    #[error("cancellation requested")]
    Cancelled,
}

impl RankError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RankError::InsufficientData { .. } | RankError::InvalidWindow { .. } => ErrorKind::Validation,
            RankError::DataIntegrity { .. } | RankError::MalformedRecord(_) | RankError::UnknownDocument(_) => {
                ErrorKind::DataIntegrity
            }
            RankError::Store(_) | RankError::Codec(_) | RankError::Unavailable(_) | RankError::Halted { .. } => {
                ErrorKind::ResourceUnavailable
            }
            RankError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn integrity(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        RankError::DataIntegrity { subject: subject.into(), detail: detail.into() }
    }
}
