use thiserror::Error;

/// Longest statement excerpt rendered inside an error message
const STATEMENT_PREVIEW_LEN: usize = 256;

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Address error: {0}")]
    Address(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("parse failed for statement {:?}: {}", preview(.statement), .message)]
    Parse { statement: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("cannot execute {:?}: {}", preview(.statement), .message)]
    Execution { statement: String, message: String },

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Wrap a driver failure with the statement that caused it
    pub fn execution(statement: &str, cause: PipelineError) -> Self {
        let message = match cause {
            PipelineError::Database(msg) => msg,
            other => other.to_string(),
        };
        PipelineError::Execution {
            statement: statement.to_string(),
            message,
        }
    }

    pub fn parse(statement: &str, message: impl Into<String>) -> Self {
        PipelineError::Parse {
            statement: statement.to_string(),
            message: message.into(),
        }
    }

    /// The statement attached to a parse or execution error
    pub fn statement(&self) -> Option<&str> {
        match self {
            PipelineError::Parse { statement, .. } | PipelineError::Execution { statement, .. } => {
                Some(statement)
            }
            _ => None,
        }
    }
}

/// Shorten a statement for display, keeping char boundaries intact
pub fn preview(statement: &str) -> String {
    if statement.len() <= STATEMENT_PREVIEW_LEN {
        return statement.to_string();
    }

    let mut end = STATEMENT_PREVIEW_LEN;
    while !statement.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &statement[..end])
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<url::ParseError> for PipelineError {
    fn from(err: url::ParseError) -> Self {
        PipelineError::Address(err.to_string())
    }
}

impl From<base64::DecodeError> for PipelineError {
    fn from(err: base64::DecodeError) -> Self {
        PipelineError::Address(format!("invalid base64 payload: {}", err))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_carries_statement() {
        let err = PipelineError::execution(
            "INSERT INTO t VALUES (1)",
            PipelineError::Database("duplicate key".to_string()),
        );
        assert_eq!(err.statement(), Some("INSERT INTO t VALUES (1)"));
        let msg = err.to_string();
        assert!(msg.contains("INSERT INTO t VALUES (1)"));
        assert!(msg.contains("duplicate key"));
        assert!(!msg.contains("Database error"));
    }

    #[test]
    fn test_long_statement_is_abbreviated() {
        let statement = format!("INSERT INTO t VALUES {}", "(1), ".repeat(200));
        let err = PipelineError::execution(&statement, PipelineError::Database("boom".into()));
        let msg = err.to_string();
        assert!(msg.len() < statement.len());
        assert!(msg.contains("..."));
        // the full text is still available to callers
        assert_eq!(err.statement(), Some(statement.as_str()));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let statement = "é".repeat(STATEMENT_PREVIEW_LEN);
        let shortened = preview(&statement);
        assert!(shortened.ends_with("..."));
    }
}
