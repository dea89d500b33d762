use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("{target} not found")]
    NotFound { target: String },

    #[error("function starting at byte {start} has no matching closing delimiter")]
    UnterminatedFunction { start: usize },

    #[error("invalid pattern for {target}: {message}")]
    InvalidPattern { target: String, message: String },
}
