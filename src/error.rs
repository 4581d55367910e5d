//! Error types for the share e2e harness
//!
//! Errors carry the fixture, check or wait they belong to so a failing run
//! report can be read without the surrounding logs. The variants split into
//! the scenario taxonomy (setup, timeout, verification, access, teardown) and
//! plumbing errors from the Kubernetes client, manifests and local I/O.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Kind of failure reported by a share access attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFailure {
    /// Endpoint unreachable, name did not resolve, or the attempt timed out
    Connection,
    /// Server rejected the credential
    Auth,
    /// Connected and authenticated but a file operation failed
    Operation,
}

impl std::fmt::Display for AccessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessFailure::Connection => write!(f, "connection"),
            AccessFailure::Auth => write!(f, "auth"),
            AccessFailure::Operation => write!(f, "operation"),
        }
    }
}

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A fixture could not be applied
    #[error("setup error for fixture {fixture}: {message}")]
    Setup {
        /// Fixture path (or object) that failed
        fixture: String,
        /// Description of what failed
        message: String,
    },

    /// A poll deadline elapsed before the condition held
    #[error("timed out after {timeout:?} waiting for {description} (last observed: {last_observed})")]
    Timeout {
        /// What was being waited for
        description: String,
        /// Configured deadline
        timeout: Duration,
        /// Last state reported by the probe
        last_observed: String,
    },

    /// A verification check did not hold
    #[error("verification failed [{check}]: {message}")]
    Verification {
        /// Name of the check
        check: String,
        /// Description of the mismatch
        message: String,
    },

    /// A share access attempt failed
    #[error("{kind} failure accessing {endpoint}: {message}")]
    Access {
        /// Failure classification
        kind: AccessFailure,
        /// `//host/share` that was targeted
        endpoint: String,
        /// Client output or reason
        message: String,
    },

    /// A fixture could not be removed
    #[error("teardown error for fixture {fixture}: {message}")]
    Teardown {
        /// Fixture path (or object) that leaked
        fixture: String,
        /// Description of what failed
        message: String,
    },

    /// A fixture manifest could not be read or parsed
    #[error("manifest error [{path}]: {message}")]
    Manifest {
        /// Manifest path
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Local I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a setup error for a fixture
    pub fn setup(fixture: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Setup {
            fixture: fixture.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error with the last observed state
    pub fn timeout(
        description: impl Into<String>,
        timeout: Duration,
        last_observed: impl Into<String>,
    ) -> Self {
        Self::Timeout {
            description: description.into(),
            timeout,
            last_observed: last_observed.into(),
        }
    }

    /// Create a verification error for a named check
    pub fn verification(check: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Verification {
            check: check.into(),
            message: msg.into(),
        }
    }

    /// Create an access error
    pub fn access(
        kind: AccessFailure,
        endpoint: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Access {
            kind,
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create a teardown error for a fixture
    pub fn teardown(fixture: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Teardown {
            fixture: fixture.into(),
            message: msg.into(),
        }
    }

    /// Create a manifest error for a path
    pub fn manifest(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error without specific context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Access failure kind, if this is an access error
    pub fn access_failure(&self) -> Option<AccessFailure> {
        match self {
            Error::Access { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this is a poll timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
