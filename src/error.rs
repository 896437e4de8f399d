//! Error codes and the sticky per-context error state
//!
//! The renderer follows a C-style contract: bad input never panics. Public
//! entry points validate their preconditions, record an error code plus the
//! name of the failing operation, and degrade to a no-op. The last recorded
//! code stays queryable until replaced or taken.

use thiserror::Error;

/// Error taxonomy for all public entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorCode {
    #[error("no error")]
    None,
    #[error("required resource is missing")]
    NullPointer,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid or stale resource id")]
    InvalidId,
    #[error("invalid state")]
    InvalidState,
    #[error("index out of bounds")]
    IndexOutOfBounds,
    #[error("argument mismatch")]
    ArgumentMismatch,
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("context creation failed")]
    ContextCreationFailed,
    #[error("fatal error")]
    Fatal,
}

/// An error with the operation (or message) it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderError {
    pub code: ErrorCode,
    pub context: &'static str,
}

impl RenderError {
    pub fn new(code: ErrorCode, context: &'static str) -> Self {
        Self { code, context }
    }

    /// Fatal errors mark detected data corruption (e.g. an index buffer
    /// entry past the vertex count) and abort the current draw.
    pub fn fatal(context: &'static str) -> Self {
        Self { code: ErrorCode::Fatal, context }
    }
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.code)
    }
}

impl std::error::Error for RenderError {}

pub type RenderResult<T> = Result<T, RenderError>;

/// Callback invoked synchronously whenever an error is recorded.
pub type ErrorHandler = Box<dyn FnMut(ErrorCode, &str)>;

/// Sticky last-error storage with an optional user handler.
pub struct ErrorState {
    last: ErrorCode,
    handler: Option<ErrorHandler>,
}

impl Default for ErrorState {
    fn default() -> Self {
        Self { last: ErrorCode::None, handler: None }
    }
}

impl ErrorState {
    pub fn record(&mut self, error: RenderError) {
        log::warn!("render error: {}", error);
        self.last = error.code;
        if let Some(handler) = self.handler.as_mut() {
            handler(error.code, error.context);
        }
    }

    /// Record the error of a failed result, passing successes through.
    pub fn check<T>(&mut self, result: RenderResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.record(e);
                None
            }
        }
    }

    pub fn last(&self) -> ErrorCode {
        self.last
    }

    /// Returns the last error and resets the state to `None`.
    pub fn take(&mut self) -> ErrorCode {
        std::mem::replace(&mut self.last, ErrorCode::None)
    }

    pub fn set_handler(&mut self, handler: Option<ErrorHandler>) {
        self.handler = handler;
    }
}

impl std::fmt::Debug for ErrorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorState")
            .field("last", &self.last)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}
