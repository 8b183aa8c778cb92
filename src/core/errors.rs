/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topology validation errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum TopologyError {
    #[error("Mapping length mismatch: {0}")]
    #[diagnostic(
        code(topology::length_mismatch),
        help("thread->core, thread->node, and thread->cpu maps must all cover every thread.")
    )]
    LengthMismatch(String),

    #[error("Id out of range: {0}")]
    #[diagnostic(
        code(topology::id_out_of_range),
        help("Every core/node id referenced by a thread must be below the declared count.")
    )]
    IdOutOfRange(String),

    #[error("Inconsistent containment: {0}")]
    #[diagnostic(
        code(topology::inconsistent_containment),
        help("All sibling threads of a core must reside on the same node.")
    )]
    InconsistentContainment(String),
}

/// Unified harness error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum HarnessError {
    #[error("Topology error: {0}")]
    #[diagnostic(transparent)]
    Topology(#[from] TopologyError),

    #[error("Worker spawn failed: {0}")]
    #[diagnostic(
        code(harness::spawn_failed),
        help("Check the worker executable path and launch arguments.")
    )]
    Spawn(String),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(harness::io_error),
        help("Filesystem or pipe operation failed. Check permissions and disk space.")
    )]
    Io(String),

    #[error("Timeout: {0}")]
    #[diagnostic(
        code(harness::timeout),
        help("An experiment exceeded a generous multiple of its time budget. A worker thread may be hung.")
    )]
    Timeout(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(harness::configuration_error),
        help("Invalid harness configuration. Review shape, stride, and budget parameters.")
    )]
    Config(String),

    #[error("Internal error: {0}")]
    #[diagnostic(
        code(harness::internal_error),
        help("An unexpected internal error occurred. Please report this issue.")
    )]
    Internal(String),
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io(err.to_string())
    }
}

impl From<String> for HarnessError {
    fn from(msg: String) -> Self {
        HarnessError::Internal(msg)
    }
}

impl From<&str> for HarnessError {
    fn from(msg: &str) -> Self {
        HarnessError::Internal(msg.to_string())
    }
}

/// Result type for harness operations
///
/// # Must Use
/// Harness operations can fail and must be handled to avoid silently
/// dropping experiment results
pub type Result<T> = std::result::Result<T, HarnessError>;
