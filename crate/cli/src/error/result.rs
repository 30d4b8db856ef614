use std::fmt::Display;

use super::SampleError;

pub type SampleResult<R> = Result<R, SampleError>;

/// Trait for providing helper methods for `SampleResult`.
pub trait SampleResultHelper<T> {
    /// Sets the context for the error.
    ///
    /// # Errors
    ///
    /// Returns a `SampleResult` with the specified context.
    fn context(self, context: &str) -> SampleResult<T>;

    /// Sets the context for the error using a closure.
    ///
    /// # Errors
    ///
    /// Returns a `SampleResult` with the context returned by the closure.
    fn with_context<D, O>(self, op: O) -> SampleResult<T>
    where
        D: Display + Send + Sync + 'static,
        O: FnOnce() -> D;
}

impl<T, E> SampleResultHelper<T> for Result<T, E>
where
    E: std::error::Error,
{
    fn context(self, context: &str) -> SampleResult<T> {
        self.map_err(|e| SampleError::Default(format!("{context}: {e}")))
    }

    fn with_context<D, O>(self, op: O) -> SampleResult<T>
    where
        D: Display + Send + Sync + 'static,
        O: FnOnce() -> D,
    {
        self.map_err(|e| SampleError::Default(format!("{}: {e}", op())))
    }
}

impl<T> SampleResultHelper<T> for Option<T> {
    fn context(self, context: &str) -> SampleResult<T> {
        self.ok_or_else(|| SampleError::Default(context.to_owned()))
    }

    fn with_context<D, O>(self, op: O) -> SampleResult<T>
    where
        D: Display + Send + Sync + 'static,
        O: FnOnce() -> D,
    {
        self.ok_or_else(|| SampleError::Default(format!("{}", op())))
    }
}
