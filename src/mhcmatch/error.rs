use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    // malformed submission, rejected before queuing
    #[error("{0}")]
    Validation(String),
    #[error("The server is busy with {0} jobs, please resubmit later")]
    Capacity(usize),
    // a pipeline stage failed while running a job
    #[error("{0}")]
    Processing(String),
    #[error("{0}")]
    NotFound(String),
}

impl MatchError {
    pub fn validation(message: impl Into<String>) -> MatchError {
        MatchError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> MatchError {
        MatchError::NotFound(message.into())
    }
}

// only the outermost message is kept so that no internal detail leaks
// into job records
impl From<anyhow::Error> for MatchError {
    fn from(err: anyhow::Error) -> MatchError {
        MatchError::Processing(err.to_string())
    }
}

pub type MatchResult<T> = Result<T, MatchError>;
