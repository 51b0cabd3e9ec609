//! Error types for crondog

use std::time::Duration;

use thiserror::Error;

use crate::parser::CronField;

/// Errors raised while parsing a cron expression or a crontab line.
///
/// A parse error is fatal to the one line it came from; the rest of the
/// crontab still loads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The expression did not split into exactly five fields
    #[error("expected 5 cron fields, got {0}")]
    FieldCount(usize),

    /// Every value of a field fell outside its domain
    #[error("no valid values in {0} field")]
    EmptyField(CronField),

    /// A token could not be read as a value, range or step
    #[error("malformed token '{token}' in {field} field")]
    Malformed { field: CronField, token: String },

    /// A crontab line carried a schedule but no command
    #[error("crontab line has no command")]
    MissingCommand,
}

/// Errors raised while evaluating one service for one tick.
///
/// The service keeps its previous state and the next tick retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// No matching minute within the one-year search horizon
    #[error("no occurrence of '{0}' within one year")]
    NoOccurrenceFound(String),

    #[error("service '{0}' has no start jobs")]
    NoStartJobs(String),

    #[error("service '{0}' has no stop jobs")]
    NoStopJobs(String),
}

/// Liveness probe failures. The supervisor downgrades all of these to
/// "not running".
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe command failed: {0}")]
    Command(String),
}

/// Top-level error for the supervisor and its CLI
#[derive(Debug, Error)]
pub enum CrondogError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The crontab source could not be read
    #[error("crontab error: {0}")]
    Crontab(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Another supervisor holds the PID file
    #[error("crondog is already running (pid {0})")]
    AlreadyRunning(i32),

    /// No live supervisor is recorded in the PID file
    #[error("crondog is not running: {0}")]
    NotRunning(String),
}

/// Result type alias for crondog operations
pub type Result<T> = std::result::Result<T, CrondogError>;
