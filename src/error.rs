//! Error types shared across the crate.
//!
//! Every fallible operation surfaces one of the variants of [`GantryError`]:
//! - `NotFound` for single-row fetches that matched nothing
//! - `Build` when a statement cannot be rendered from the given state
//! - `Execution` for driver-reported failures, tagged with the stage they
//!   surfaced at
//! - `Hook` when a lifecycle hook aborts the enclosing operation
//! - `TypeMismatch` when a scanned value cannot be coerced to the requested type
//! - `NotRegistered` for schema lookups against an unpopulated registry
//! - `NoActiveTransaction` for commit/rollback outside an open transaction
//!
//! Nothing here retries: errors propagate to the immediate caller.

use std::fmt;

/// Stage marker attached to driver-reported failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Statement assembly, before anything reached the driver
    Build,
    /// A row-returning statement
    Query,
    /// A non-row statement (INSERT/UPDATE/DELETE/DDL) or connection setup
    Exec,
    /// The batched follow-up query issued by relation loading
    Preload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Build => "build",
            Stage::Query => "query",
            Stage::Exec => "exec",
            Stage::Preload => "preload",
        };
        write!(f, "{s}")
    }
}

/// Failure reported by the underlying database driver.
///
/// Connection implementations convert their native error type into this one,
/// keeping the rest of the crate driver-agnostic. The original error is
/// retained as the source when available.
#[derive(Debug)]
pub struct DriverError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DriverError {
    /// Create a driver error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a driver error that retains the native error as its source.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The driver's description of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// A statement could not be rendered from the given builder/dialect state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    message: String,
}

impl BuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build error: {}", self.message)
    }
}

impl std::error::Error for BuildError {}

/// A lifecycle hook rejected the operation it guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook error: {}", self.message)
    }
}

impl std::error::Error for HookError {}

/// Top-level error type for all crate operations.
#[derive(Debug)]
pub enum GantryError {
    /// A single-row fetch matched no rows
    NotFound,
    /// The statement could not be built
    Build(BuildError),
    /// The driver reported a failure
    Execution {
        /// Stage the failure surfaced at
        stage: Stage,
        /// Driver-reported cause
        source: DriverError,
    },
    /// A lifecycle hook aborted the operation
    Hook(HookError),
    /// A scanned value could not be coerced to the requested type
    TypeMismatch {
        /// Requested Rust-side type
        expected: &'static str,
        /// What the driver actually produced
        actual: String,
    },
    /// No schema is bound for the record type in the registry
    NotRegistered {
        /// Fully qualified name of the record type
        type_name: &'static str,
    },
    /// Commit or rollback was called on a session with no open transaction
    NoActiveTransaction,
}

impl GantryError {
    /// Wrap a driver failure with the stage it surfaced at.
    pub fn execution(stage: Stage, source: DriverError) -> Self {
        GantryError::Execution { stage, source }
    }

    /// Shorthand for a [`BuildError`] wrapped in the top-level type.
    pub fn build(message: impl Into<String>) -> Self {
        GantryError::Build(BuildError::new(message))
    }

    /// Shorthand for a type-coercion failure.
    pub fn type_mismatch(expected: &'static str, actual: impl Into<String>) -> Self {
        GantryError::TypeMismatch {
            expected,
            actual: actual.into(),
        }
    }

    /// True when this error is the not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GantryError::NotFound)
    }
}

impl fmt::Display for GantryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GantryError::NotFound => {
                write!(f, "record not found")
            }
            GantryError::Build(e) => {
                write!(f, "{e}")
            }
            GantryError::Execution { stage, source } => {
                write!(f, "execution error ({stage}): {source}")
            }
            GantryError::Hook(e) => {
                write!(f, "{e}")
            }
            GantryError::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {expected}, got {actual}")
            }
            GantryError::NotRegistered { type_name } => {
                write!(f, "no schema registered for type {type_name}")
            }
            GantryError::NoActiveTransaction => {
                write!(f, "no active transaction")
            }
        }
    }
}

impl std::error::Error for GantryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GantryError::Build(e) => Some(e),
            GantryError::Execution { source, .. } => Some(source),
            GantryError::Hook(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BuildError> for GantryError {
    fn from(err: BuildError) -> Self {
        GantryError::Build(err)
    }
}

impl From<HookError> for GantryError {
    fn from(err: HookError) -> Self {
        GantryError::Hook(err)
    }
}
