//! Error types for rivven-query-cdc
//!
//! Every failure of a pipeline run maps to exactly one [`ErrorKind`]. Errors
//! raised by a collaborator carry the name of the operation that produced
//! them so the caller sees where the run stopped.

use std::fmt;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure taxonomy of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A request field is missing or malformed
    InvalidRequest,
    /// The query engine rejected or failed the query
    QueryExecutionFailed,
    /// Reading the next row from the cursor failed
    RowReadFailed,
    /// A row could not be encoded as a JSON event
    SerializationFailed,
    /// Connecting to the message broker failed
    BrokerConnectFailed,
    /// The broker did not acknowledge a publish
    PublishFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "InvalidRequest"),
            Self::QueryExecutionFailed => write!(f, "QueryExecutionFailed"),
            Self::RowReadFailed => write!(f, "RowReadFailed"),
            Self::SerializationFailed => write!(f, "SerializationFailed"),
            Self::BrokerConnectFailed => write!(f, "BrokerConnectFailed"),
            Self::PublishFailed => write!(f, "PublishFailed"),
        }
    }
}

/// Errors produced by a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request validation failed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Query submission, completion wait, or result read failed
    #[error("{op}: {message}")]
    QueryExecution { op: &'static str, message: String },

    /// Cursor iteration failed
    #[error("{op}: {message}")]
    RowRead { op: &'static str, message: String },

    /// Event encoding failed
    #[error("{op}: {message}")]
    Serialization { op: &'static str, message: String },

    /// Broker connection or topic binding failed
    #[error("{op}: {message}")]
    BrokerConnect { op: &'static str, message: String },

    /// Publish acknowledgment failed
    #[error("{op}: {message}")]
    Publish { op: &'static str, message: String },
}

impl PipelineError {
    /// Create a validation error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a query execution error
    pub fn query(op: &'static str, msg: impl fmt::Display) -> Self {
        Self::QueryExecution {
            op,
            message: msg.to_string(),
        }
    }

    /// Create a row read error
    pub fn row_read(op: &'static str, msg: impl fmt::Display) -> Self {
        Self::RowRead {
            op,
            message: msg.to_string(),
        }
    }

    /// Create a serialization error
    pub fn serialization(op: &'static str, msg: impl fmt::Display) -> Self {
        Self::Serialization {
            op,
            message: msg.to_string(),
        }
    }

    /// Create a broker connection error
    pub fn broker_connect(op: &'static str, msg: impl fmt::Display) -> Self {
        Self::BrokerConnect {
            op,
            message: msg.to_string(),
        }
    }

    /// Create a publish error
    pub fn publish(op: &'static str, msg: impl fmt::Display) -> Self {
        Self::Publish {
            op,
            message: msg.to_string(),
        }
    }

    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::QueryExecution { .. } => ErrorKind::QueryExecutionFailed,
            Self::RowRead { .. } => ErrorKind::RowReadFailed,
            Self::Serialization { .. } => ErrorKind::SerializationFailed,
            Self::BrokerConnect { .. } => ErrorKind::BrokerConnectFailed,
            Self::Publish { .. } => ErrorKind::PublishFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::invalid("topic must be set");
        assert_eq!(err.to_string(), "invalid request: topic must be set");

        let err = PipelineError::publish("publish", "deadline exceeded");
        assert_eq!(err.to_string(), "publish: deadline exceeded");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            PipelineError::query("query.wait", "syntax error").kind(),
            ErrorKind::QueryExecutionFailed
        );
        assert_eq!(
            PipelineError::row_read("rows.next", "eof").kind(),
            ErrorKind::RowReadFailed
        );
        assert_eq!(
            PipelineError::broker_connect("pubsub.connect", "refused").kind(),
            ErrorKind::BrokerConnectFailed
        );
        assert_eq!(ErrorKind::PublishFailed.to_string(), "PublishFailed");
    }
}
