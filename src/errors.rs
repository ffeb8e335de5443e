// src/errors.rs
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide error type.
///
/// Only the input/config/report variants ever reach the caller of a run; tool
/// and probe failures are folded into stage results and liveness classes.
#[derive(Error, Debug)]
pub enum UltrascanError {
    // === I/O ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === target intake / configuration (fatal) ===
    #[error("failed to read target source '{path}': {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("target source contains no targets")]
    EmptyTargets,

    #[error("Invalid concurrency limit: {value} (must be >= 1)")]
    InvalidConcurrency { value: usize },

    #[error("Invalid timeout: {value}s (must be >= 1)")]
    InvalidTimeout { value: u64 },

    #[error("Missing required argument: {arg}")]
    MissingArgument { arg: String },

    #[error("configuration error: {0}")]
    Config(String),

    // === external tools (recovered at stage level) ===
    #[error("tool not found: {program}")]
    ToolNotFound { program: String },

    #[error("tool '{program}' timed out after {}s", timeout.as_secs())]
    ToolTimeout { program: String, timeout: Duration },

    #[error("tool '{program}' failed: {reason}")]
    ToolExecution { program: String, reason: String },

    // === liveness (downgraded to Unreachable) ===
    #[error("probe of '{target}' failed: {reason}")]
    ProbeFailure { target: String, reason: String },

    // === job state machine ===
    #[error("invalid job transition for '{target}': {from} -> {to}")]
    InvalidTransition {
        target: String,
        from: String,
        to: String,
    },

    // === report ===
    #[error("failed to write report to '{path}': {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Operation failed: {0}")]
    Generic(String),
}

impl UltrascanError {
    /// True for the per-invocation failures a stage absorbs into its result.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound { .. } | Self::ToolTimeout { .. } | Self::ToolExecution { .. }
        )
    }

    /// True for errors that abort a run before scheduling.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Input { .. }
                | Self::EmptyTargets
                | Self::InvalidConcurrency { .. }
                | Self::InvalidTimeout { .. }
                | Self::MissingArgument { .. }
                | Self::Config(_)
        )
    }
}
