use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup validation failed: {0}")]
    Startup(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cleanup lock held by a live process after waiting {waited:?}")]
    LockTimeout { waited: Duration },

    #[error("cleanup budget of {budget:?} exceeded")]
    BudgetExceeded { budget: Duration },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code for this error. Timeout and lock contention get
    /// stable codes so container scripts can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::BudgetExceeded { .. } => 3,
            Error::LockTimeout { .. } => 4,
            _ => 1,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
