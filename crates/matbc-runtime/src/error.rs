//! Runtime errors

use thiserror::Error;

use matbc_core::MatbcError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] MatbcError),
}

impl RuntimeError {
    /// Exit code for the binary
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::Io { .. } | RuntimeError::Json(_) | RuntimeError::Config(_) => 2,
            RuntimeError::Session(MatbcError::MalformedCommand { .. }) => 3,
            RuntimeError::Session(_) => 1,
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_wrap_transparently() {
        let err = RuntimeError::from(MatbcError::SessionAborted);
        assert_eq!(err.to_string(), MatbcError::SessionAborted.to_string());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_scenario_errors_have_own_exit_code() {
        let err = RuntimeError::from(MatbcError::malformed(4, "bad time"));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(RuntimeError::Config("x".into()).exit_code(), 2);
    }
}
