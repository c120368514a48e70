//! Read-only probes against a target host.
//!
//! The [`HostBackend`] trait decouples the engine from how the target is
//! reached. [`crate::io::shell::ShellBackend`] runs probes through a local
//! shell, `ssh`, or a container CLI; tests use `FakeBackend` from
//! `test_support`, which answers from in-memory tables.

use thiserror::Error;

use crate::core::types::{CommandResult, ErrorKind, FileStat, PackageInfo, UserInfo};

/// Failure to obtain a probe answer. A probe that answers "no" is not an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The transport could not reach the target.
    #[error("target unavailable: {0}")]
    Unavailable(String),
    /// The probe did not finish in time.
    #[error("probe timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The target answered with something the probe could not interpret.
    #[error("probe failed: {0}")]
    Probe(String),
}

impl BackendError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Timeout(_) => ErrorKind::Timeout,
            BackendError::Unavailable(_) | BackendError::Probe(_) => {
                ErrorKind::BackendUnavailable
            }
        }
    }
}

/// Probes the engine may issue. Implementations must never mutate the target
/// and must be safe to call from several worker threads at once.
pub trait HostBackend: Send + Sync {
    /// Establish (or verify) the connection before any assertion runs.
    fn connect(&self) -> Result<(), BackendError>;

    /// Run a shell command line on the target.
    fn run_command(&self, cmd: &str) -> Result<CommandResult, BackendError>;

    /// Missing paths yield `exists = false`, never an error.
    fn stat_file(&self, path: &str) -> Result<FileStat, BackendError>;

    /// File contents, or `None` when the path does not exist.
    fn read_file(&self, path: &str) -> Result<Option<String>, BackendError>;

    fn package_info(&self, name: &str) -> Result<PackageInfo, BackendError>;

    fn user_info(&self, name: &str) -> Result<UserInfo, BackendError>;

    /// Release the connection. Called once at the end of a run, whatever the outcome.
    fn release(&self) {}
}
