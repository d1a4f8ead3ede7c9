use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::database::{DatabaseError, Stage};
use crate::inputs::Placeholder;
use crate::output::ExpectedRows;
use crate::schema::SchemaKey;

/// Configuration could not be turned into a working enrichment. Always
/// carries at least one message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid sql query enrichment configuration: {}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

impl ConfigError {
    pub fn single(message: impl Into<String>) -> Self {
        ConfigError(vec![message.into()])
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("required input for placeholder {placeholder} ({location}) is missing")]
    MissingRequired {
        placeholder: Placeholder,
        location: String,
    },
    #[error("input for placeholder {placeholder} ({location}) is {kind}, which cannot be bound")]
    Unbindable {
        placeholder: Placeholder,
        location: String,
        kind: &'static str,
    },
    #[error("invalid JSONPath {path} for placeholder {placeholder}: {message}")]
    InvalidPath {
        placeholder: Placeholder,
        path: String,
        message: String,
    },
}

impl ExtractionError {
    pub fn placeholder(&self) -> Placeholder {
        match self {
            ExtractionError::MissingRequired { placeholder, .. }
            | ExtractionError::Unbindable { placeholder, .. }
            | ExtractionError::InvalidPath { placeholder, .. } => *placeholder,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("query returned {actual} rows but {expected} were expected")]
    TooManyRows {
        expected: ExpectedRows,
        actual: usize,
    },
}

/// Failures of the blocking execution context itself, as opposed to failures
/// of the work it ran.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("timed out after {}ms while {stage}", .timeout.as_millis())]
    TimedOut { stage: Stage, timeout: Duration },
    #[error("database task panicked while {0}")]
    Panicked(Stage),
    #[error("database runtime shut down while {0}")]
    Cancelled(Stage),
    #[error("dispatcher is closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("could not acquire a database connection: {0}")]
    Connection(DatabaseError),
    #[error("query execution failed: {0}")]
    Execution(DatabaseError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl EnrichmentError {
    /// Returns a short error code for metric labels and canonical logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            EnrichmentError::Extraction(_) => "extraction_error",
            EnrichmentError::Connection(_) => "connection_error",
            EnrichmentError::Execution(DatabaseError::Bind { .. }) => "bind_error",
            EnrichmentError::Execution(DatabaseError::Conversion { .. }) => "conversion_error",
            EnrichmentError::Execution(_) => "execution_error",
            EnrichmentError::Envelope(_) => "envelope_error",
            EnrichmentError::Dispatch(DispatchError::TimedOut { .. }) => "timeout",
            EnrichmentError::Dispatch(DispatchError::Panicked(_)) => "dispatch_panic",
            EnrichmentError::Dispatch(DispatchError::Cancelled(_) | DispatchError::Closed) => {
                "dispatch_unavailable"
            }
        }
    }
}

/// Uniform failure record handed back to the pipeline for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentFailure {
    pub enrichment: SchemaKey,
    pub messages: Vec<String>,
}

impl EnrichmentFailure {
    pub fn new(enrichment: SchemaKey, error: &EnrichmentError) -> Self {
        Self {
            enrichment,
            messages: vec![error.to_string()],
        }
    }
}

impl fmt::Display for EnrichmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.enrichment, self.messages.join("; "))
    }
}
