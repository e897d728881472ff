#![deny(missing_docs)]
//! Tool catalog and validated invocation.
//!
//! [`ToolDyn`] is the object-safe trait every tool source implements —
//! local functions, external endpoints, anything that takes a JSON
//! argument object and produces a JSON result. [`ToolRegistry`] is the
//! name-indexed catalog; once wrapped in an `Arc` it is immutable, and
//! schema changes mean building a new registry. [`ToolRunner`] validates
//! arguments against the declared schema *before* the tool sees them and
//! enforces the per-call deadline and cancellation.

pub mod registry;
pub mod runner;
pub mod validate;

pub use registry::{FnTool, ToolDyn, ToolFuture, ToolRegistry};
pub use runner::{ToolContext, ToolRunner};
pub use validate::{validate_args, ValidationError};

use cortex_types::{Component, Error, ErrorKind};
use thiserror::Error as ThisError;

/// Tool failure taxonomy.
#[non_exhaustive]
#[derive(Debug, Clone, ThisError)]
pub enum ToolError {
    /// The requested tool is not in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Arguments failed validation against the declared schema.
    #[error("invalid arguments: {0}")]
    Validation(#[from] ValidationError),

    /// The tool itself failed while executing.
    #[error("invocation failed: {message}")]
    Invocation {
        /// The underlying failure.
        message: String,
        /// Whether re-running might succeed.
        retryable: bool,
    },

    /// The per-call deadline elapsed.
    #[error("tool call timed out")]
    Timeout,

    /// The caller cancelled the invocation.
    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    /// Shorthand for a non-retryable invocation failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Invocation {
            message: message.into(),
            retryable: false,
        }
    }

    /// Shorthand for a retryable invocation failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Invocation {
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<ToolError> for Error {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound(name) => Error::new(
                ErrorKind::ToolNotFound,
                Component::Tool,
                format!("tool not found: {name}"),
            ),
            ToolError::Validation(v) => {
                Error::new(ErrorKind::ToolValidation, Component::Tool, v.to_string())
            }
            ToolError::Invocation { message, retryable } => {
                Error::new(ErrorKind::ToolInvocation, Component::Tool, message)
                    .with_retryable(retryable)
            }
            ToolError::Timeout => Error::timeout(Component::Tool, "tool call deadline elapsed"),
            ToolError::Cancelled => Error::cancelled(Component::Tool),
        }
    }
}
