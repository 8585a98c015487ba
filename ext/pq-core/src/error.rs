use std::fmt;

use thiserror::Error;

/// Message shown when the engine is used after its context has been torn down.
pub const UNAVAILABLE_MESSAGE: &str = "ERROR: pq plugin cannot be used after 'clear all'\n\
Please restart to continue\n\
Instead of 'clear all', you can use 'pq clear', which is equivalent to:\n\
    clear\n\
    macro drop _all\n\
    scalar drop _all\n\
    matrix drop _all\n\
    timer clear";

/// The top-level stage an error surfaced from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Import,
    Export,
    BinaryPrescan,
    Handoff,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Import => write!(f, "import"),
            Stage::Export => write!(f, "export"),
            Stage::BinaryPrescan => write!(f, "binary prescan"),
            Stage::Handoff => write!(f, "handoff"),
        }
    }
}

/// Core error type for transposition operations
#[derive(Error, Debug)]
pub enum TransposeError {
    /// The engine context is closed or was never created
    #[error("{}", UNAVAILABLE_MESSAGE)]
    Unavailable,

    /// A referenced column has no corresponding store variable
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// A column type the requested direction cannot transfer
    #[error("Unsupported type for column '{column}': {detail}")]
    UnsupportedType { column: String, detail: String },

    /// Invalid argument errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Descriptor handles that were not issued, or were already released
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Failures reported by the row store
    #[error("Store error: {0}")]
    Store(String),

    /// A worker batch failed
    #[error("{stage} batch {batch} (rows {start}..{end}) failed: {source}")]
    Batch {
        stage: Stage,
        batch: usize,
        start: usize,
        end: usize,
        #[source]
        source: Box<TransposeError>,
    },

    /// A worker task panicked
    #[error("Worker task panicked: {0}")]
    TaskPanicked(String),

    /// The worker pool could not be built
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Arrow errors from Arrow operations
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// A failure wrapped with the stage it surfaced from
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<TransposeError>,
    },

    /// An error with context prepended
    #[error("{message}: {source}")]
    Context {
        message: String,
        #[source]
        source: Box<TransposeError>,
    },

    /// Internal errors that shouldn't happen
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for transposition operations
pub type Result<T> = std::result::Result<T, TransposeError>;

impl TransposeError {
    pub fn unknown_column<S: Into<String>>(name: S) -> Self {
        TransposeError::UnknownColumn(name.into())
    }

    pub fn unsupported<C: Into<String>, D: Into<String>>(column: C, detail: D) -> Self {
        TransposeError::UnsupportedType {
            column: column.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        TransposeError::InvalidArgument(msg.into())
    }

    pub fn invalid_handle<S: Into<String>>(msg: S) -> Self {
        TransposeError::InvalidHandle(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        TransposeError::Store(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        TransposeError::Internal(msg.into())
    }

    /// Wrap once with the stage name; already-staged errors pass through
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            e @ (TransposeError::Stage { .. } | TransposeError::Unavailable) => e,
            other => TransposeError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Whether this error (or the error it wraps) is the availability fault
    pub fn is_unavailable(&self) -> bool {
        match self {
            TransposeError::Unavailable => true,
            TransposeError::Stage { source, .. }
            | TransposeError::Batch { source, .. }
            | TransposeError::Context { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }
}

/// Extension trait to add context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, ctx: S) -> Result<T>;

    /// Add context with a closure that's only called on error
    fn with_context<S: Into<String>, F: FnOnce() -> S>(self, f: F) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<TransposeError>,
{
    fn context<S: Into<String>>(self, ctx: S) -> Result<T> {
        self.map_err(|e| TransposeError::Context {
            message: ctx.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<S: Into<String>, F: FnOnce() -> S>(self, f: F) -> Result<T> {
        self.map_err(|e| TransposeError::Context {
            message: f().into(),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TransposeError::unknown_column("price");
        assert_eq!(err.to_string(), "Unknown column: price");

        let err = TransposeError::unsupported("when", "Timestamp(Second, None)");
        assert_eq!(
            err.to_string(),
            "Unsupported type for column 'when': Timestamp(Second, None)"
        );
    }

    #[test]
    fn test_stage_wraps_once() {
        let err = TransposeError::store("boom")
            .in_stage(Stage::Export)
            .in_stage(Stage::Handoff);
        assert_eq!(err.to_string(), "export failed: Store error: boom");
    }

    #[test]
    fn test_unavailable_is_not_wrapped() {
        let err = TransposeError::Unavailable.in_stage(Stage::Import);
        assert!(matches!(err, TransposeError::Unavailable));
        assert!(err.to_string().contains("pq clear"));
    }

    #[test]
    fn test_unavailable_detected_through_batch() {
        let err = TransposeError::Batch {
            stage: Stage::Import,
            batch: 2,
            start: 10,
            end: 20,
            source: Box::new(TransposeError::Unavailable),
        };
        assert!(err.is_unavailable());
        assert!(!TransposeError::internal("x").is_unavailable());
    }

    #[test]
    fn test_error_with_context() {
        fn failing_operation() -> Result<()> {
            Err(TransposeError::invalid_argument("bad input"))
        }

        let column = "price";
        let result = failing_operation().with_context(|| format!("Binding column: {}", column));

        let err = result.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Binding column: price: Invalid argument: bad input"
        );
        match &err {
            TransposeError::Context { source, .. } => {
                assert!(matches!(**source, TransposeError::InvalidArgument(_)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_context_keeps_availability() {
        let result: Result<()> = Err(TransposeError::Unavailable);
        let err = result.context("Reading long-text column 'memo'").unwrap_err();
        assert!(err.is_unavailable());
        assert!(!err.to_string().contains("Internal error"));
    }
}
