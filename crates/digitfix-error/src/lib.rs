//! Error type shared by every digitfix crate.
//!
//! The variants follow the patcher's failure taxonomy: structural surprises
//! in the target class, an unusable template, and execution failures inside
//! the verification harness. A structural *mismatch* (the expected construct
//! is simply absent) and an *already fixed* verdict are not errors and never
//! appear here.

use std::io;

/// Convenience alias used across the workspace.
pub type Result<T, E = DigitfixError> = std::result::Result<T, E>;

/// Primary error type.
#[derive(Debug, thiserror::Error)]
pub enum DigitfixError {
    /// The class file bytes do not follow the container format.
    #[error("malformed class file: {detail}")]
    MalformedClass { detail: String },

    /// The branch construct exists but breaks an assumption the patch relies on.
    #[error("structural violation: {detail}")]
    StructuralViolation { detail: String },

    /// The template artifact could not be located, read, or lacks the
    /// replacement method.
    #[error("template unavailable: {detail}")]
    TemplateUnavailable { detail: String },

    /// The template references state the target class does not declare.
    #[error("template does not fit target: {detail}")]
    TemplateMismatch { detail: String },

    /// A construct the container model deliberately does not handle.
    #[error("unsupported: {detail}")]
    Unsupported { detail: String },

    /// Bytecode execution failed inside the harness interpreter.
    #[error("execution failed: {detail}")]
    Execution { detail: String },

    /// Invalid configuration file or value.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for diagnostics and patch-state reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The target is not what the patcher expects; bytes stay untouched.
    Structural,
    /// The replacement method cannot be produced.
    Template,
    /// Harness-side execution.
    Execution,
    /// Configuration or environment.
    Environment,
    /// Bug in digitfix itself.
    Internal,
}

impl DigitfixError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedClass {
            detail: detail.into(),
        }
    }

    pub fn violation(detail: impl Into<String>) -> Self {
        Self::StructuralViolation {
            detail: detail.into(),
        }
    }

    pub fn template_unavailable(detail: impl Into<String>) -> Self {
        Self::TemplateUnavailable {
            detail: detail.into(),
        }
    }

    pub fn template_mismatch(detail: impl Into<String>) -> Self {
        Self::TemplateMismatch {
            detail: detail.into(),
        }
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::Unsupported {
            detail: detail.into(),
        }
    }

    pub fn execution(detail: impl Into<String>) -> Self {
        Self::Execution {
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// Classify this error.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedClass { .. }
            | Self::StructuralViolation { .. }
            | Self::Unsupported { .. } => ErrorCategory::Structural,
            Self::TemplateUnavailable { .. } | Self::TemplateMismatch { .. } => {
                ErrorCategory::Template
            }
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::Config { .. } | Self::Io(_) => ErrorCategory::Environment,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}
