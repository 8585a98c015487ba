use pq_core::TransposeError;
use thiserror::Error;

/// Status returned to the host on success
pub const STATUS_OK: i32 = 0;
/// Status for usage, syntax and runtime failures
pub const STATUS_FAILURE: i32 = 198;
/// Status when the input file does not exist
pub const STATUS_FILE_NOT_FOUND: i32 = 601;

/// Errors raised while running a host command
#[derive(Error, Debug)]
pub enum HostError {
    /// Transposition engine errors
    #[error(transparent)]
    Engine(#[from] TransposeError),

    /// Parquet format errors
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow errors from Arrow operations
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// IO errors from file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File does not exist ({0})")]
    FileNotFound(String),

    /// Malformed command arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An `if` condition that does not parse or cannot be evaluated
    #[error("Invalid if condition: {0}")]
    Condition(String),

    /// A variable pattern matched nothing
    #[error("No variables match '{0}'")]
    NoMatch(String),

    /// An error with context prepended
    #[error("{0}")]
    Context(String),
}

/// Result type alias for host commands
pub type Result<T> = std::result::Result<T, HostError>;

impl HostError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        HostError::InvalidArgument(msg.into())
    }

    /// Status code the host sees for this error
    pub fn status(&self) -> i32 {
        match self {
            HostError::FileNotFound(_) => STATUS_FILE_NOT_FOUND,
            _ => STATUS_FAILURE,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, HostError::Engine(e) if e.is_unavailable())
    }
}

/// Extension trait to add context to errors
pub trait ErrorContext<T> {
    /// Add context with a closure that's only called on error
    fn with_context<S: Into<String>, F: FnOnce() -> S>(self, f: F) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<HostError>,
{
    fn with_context<S: Into<String>, F: FnOnce() -> S>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let base_error = e.into();
            HostError::Context(format!("{}: {}", f().into(), base_error))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(HostError::FileNotFound("x.parquet".into()).status(), 601);
        assert_eq!(HostError::invalid_argument("bad").status(), 198);
        assert_eq!(HostError::Condition("x >".into()).status(), 198);
        assert_eq!(
            HostError::from(TransposeError::unknown_column("y")).status(),
            198
        );
    }

    #[test]
    fn test_engine_errors_are_transparent() {
        let err = HostError::from(TransposeError::Unavailable);
        assert!(err.is_unavailable());
        assert_eq!(err.to_string(), TransposeError::Unavailable.to_string());
    }

    #[test]
    fn test_with_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = result.with_context(|| "Opening out.parquet").unwrap_err();
        assert!(err.to_string().contains("Opening out.parquet"));
        assert!(err.to_string().contains("denied"));
    }
}
