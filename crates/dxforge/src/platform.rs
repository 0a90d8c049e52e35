//! The seam to the execution platform's API.
//!
//! The core is transport-agnostic: everything it needs from the platform
//! goes through [`PlatformApi`], a small synchronous trait (the compiler is
//! one logical thread, and every API call is a blocking suspension point).
//! The embedding binary supplies the HTTP-backed implementation;
//! `test-support` supplies an in-memory double.
//!
//! Transient faults are retried here with bounded, deterministic
//! exponential backoff. Nothing else in the compiler retries.

use std::thread;
use std::time::Duration;

use serde_json::Value as Json;

/// A platform API failure.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// A request failed outright.
    #[error("platform call `{call}` failed: {message}")]
    Request {
        /// The API route that failed.
        call: &'static str,
        /// The platform's error message.
        message: String,
        /// Whether the fault looks transient (a 5xx class) and is worth
        /// retrying.
        transient: bool,
    },
    /// A referenced object does not exist or is not visible.
    #[error("no such platform object: {0}")]
    NotFound(String),
}

impl PlatformError {
    /// A permanent request failure.
    pub fn failed(call: &'static str, message: impl Into<String>) -> Self {
        PlatformError::Request {
            call,
            message: message.into(),
            transient: false,
        }
    }

    /// A transient request failure, eligible for retry.
    pub fn transient(call: &'static str, message: impl Into<String>) -> Self {
        PlatformError::Request {
            call,
            message: message.into(),
            transient: true,
        }
    }

    /// Whether retrying the call might help.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Request { transient: true, .. })
    }
}

/// The class of a found platform executable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    /// An applet.
    Applet,
    /// A workflow.
    Workflow,
}

/// A data object returned by a find or describe call.
#[derive(Clone, Debug, PartialEq)]
pub struct FoundObject {
    /// The object's name.
    pub name: String,
    /// The object's platform id.
    pub id: String,
    /// The object's checksum property, when present.
    pub digest: Option<String>,
    /// Creation time, in milliseconds since the epoch.
    pub created: i64,
    /// The folder the object lives in.
    pub folder: String,
    /// Applet or workflow.
    pub class: ObjectClass,
}

/// The platform operations the compiler consumes.
///
/// All calls are blocking; errors marked transient have already been
/// retried by the time they surface from [`retry`].
pub trait PlatformApi {
    /// Creates an applet from a rendered build request; returns its id.
    fn applet_new(&self, project: &str, request: &Json) -> Result<String, PlatformError>;

    /// Creates a workflow from a rendered build request; returns its id.
    fn workflow_new(&self, project: &str, request: &Json) -> Result<String, PlatformError>;

    /// Closes a newly built object.
    fn close(&self, id: &str) -> Result<(), PlatformError>;

    /// Finds data objects carrying the given property, within `folder` when
    /// given, project-wide otherwise.
    fn find_by_property(
        &self,
        project: &str,
        folder: Option<&str>,
        property: &str,
    ) -> Result<Vec<FoundObject>, PlatformError>;

    /// Archives the given objects out of the way.
    fn archive(&self, project: &str, ids: &[String]) -> Result<(), PlatformError>;

    /// Permanently removes the given objects.
    fn remove(&self, project: &str, ids: &[String]) -> Result<(), PlatformError>;

    /// Resolves a project-relative path to an existing executable.
    fn resolve_path(&self, project: &str, path: &str) -> Result<FoundObject, PlatformError>;

    /// Resolves a published app by name.
    fn resolve_app(&self, name: &str) -> Result<FoundObject, PlatformError>;

    /// Describes an object by id.
    fn describe(&self, id: &str) -> Result<FoundObject, PlatformError>;
}

/// How many times a transient fault is attempted in total.
const MAX_ATTEMPTS: u32 = 3;

/// The backoff before the second attempt; each further attempt doubles it.
/// Deliberately jitter-free so tests can assert the schedule.
const BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Runs a platform call, retrying transient faults with exponential
/// backoff. Permanent faults and exhausted retries surface unchanged.
pub(crate) fn retry<T>(
    call: &'static str,
    mut f: impl FnMut() -> Result<T, PlatformError>,
) -> Result<T, PlatformError> {
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let backoff = BASE_BACKOFF * 2u32.pow(attempt - 1);
                tracing::warn!(call, attempt, ?backoff, "transient platform fault; retrying");
                thread::sleep(backoff);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_retry_recovers_from_transient_faults() {
        let calls = Cell::new(0);
        let result = retry("find", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(PlatformError::transient("find", "503"))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry("find", || {
            calls.set(calls.get() + 1);
            Err(PlatformError::transient("find", "503"))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), MAX_ATTEMPTS);
    }

    #[test]
    fn test_permanent_faults_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry("applet-new", || {
            calls.set(calls.get() + 1);
            Err(PlatformError::failed("applet-new", "InvalidInput"))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
