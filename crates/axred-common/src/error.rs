//! Error types shared by the reduction generator, the devices and the CLI.

use std::fmt;

use thiserror::Error;

use crate::settings::SettingsError;

/// One local-size negotiation attempt: the size that was built and the
/// size the compiled kernel reported it can actually run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSizeAttempt {
    pub requested: usize,
    pub supported: usize,
}

impl fmt::Display for LocalSizeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (kernel max {})", self.requested, self.supported)
    }
}

fn format_attempts(attempts: &[LocalSizeAttempt]) -> String {
    if attempts.is_empty() {
        return "none".to_string();
    }
    attempts.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Errors produced while configuring, synthesizing or invoking a reduction.
#[derive(Debug, Error)]
pub enum ReduxError {
    #[error("invalid reduction configuration: {0}")]
    InvalidConfiguration(String),

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    #[error(
        "grid size {grid_size} exceeds device maximum {max_grid_size}: \
         array too big to be reduced along the selected axes"
    )]
    GridTooLarge { grid_size: usize, max_grid_size: usize },

    #[error("could not stabilize the local size; attempted {}", format_attempts(.attempts))]
    UnstableLocalSize { attempts: Vec<LocalSizeAttempt> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parse error in `{input}`: {reason}")]
    Parse { input: String, reason: String },

    #[error("device error: {reason}")]
    Device { reason: String },

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl ReduxError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    pub fn argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    pub fn device(reason: impl Into<String>) -> Self {
        Self::Device { reason: reason.into() }
    }

    pub fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse { input: input.into(), reason: reason.into() }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ReduxError>;
