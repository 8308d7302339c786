use std::time::Duration;

use http::Method;

use crate::error::Error;
use crate::response::Response;

/// Identifies one attempt of one execution. The URI is already redacted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptContext {
    method: Method,
    uri: String,
    attempt: usize,
    max_attempts: usize,
    name: String,
}

impl AttemptContext {
    pub(crate) fn new(
        method: Method,
        uri: String,
        attempt: usize,
        max_attempts: usize,
        name: String,
    ) -> Self {
        Self {
            method,
            uri,
            attempt,
            max_attempts,
            name,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// The descriptor's `Name` tag, empty when unset.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Hooks invoked synchronously from the execution loop.
pub trait ExecutionObserver: Send + Sync {
    fn on_attempt_start(&self, _context: &AttemptContext) {}

    fn on_retry_scheduled(&self, _context: &AttemptContext, _error: &Error, _delay: Duration) {}

    fn on_completed(&self, _context: &AttemptContext, _result: &Result<Response, Error>) {}
}
