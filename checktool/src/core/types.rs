//! Shared deterministic types for checktool core logic.
//!
//! Probe answers are plain data: backends produce them, the judge consumes
//! them. Nothing here performs I/O.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::spec::AssertionSpec;

/// Why an assertion did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The probe succeeded but the predicate was false.
    AssertionFailed,
    /// The target could not answer the probe.
    BackendUnavailable,
    /// The assertion or the whole run ran out of time.
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AssertionFailed => "assertion_failed",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a shell command run on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Existence and permission bits of a path on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub exists: bool,
    /// Permission bits including setuid/setgid/sticky (`0o7777` mask).
    pub mode: Option<u32>,
}

impl FileStat {
    pub fn missing() -> Self {
        Self {
            exists: false,
            mode: None,
        }
    }

    pub fn with_mode(mode: u32) -> Self {
        Self {
            exists: true,
            mode: Some(mode),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageInfo {
    pub is_installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub exists: bool,
    pub groups: BTreeSet<String>,
}

impl UserInfo {
    pub fn missing() -> Self {
        Self {
            exists: false,
            groups: BTreeSet::new(),
        }
    }
}

/// Outcome of evaluating one assertion. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub spec: AssertionSpec,
    pub passed: bool,
    pub detail: String,
    pub error: Option<ErrorKind>,
}

impl CheckResult {
    pub fn pass(spec: AssertionSpec, detail: impl Into<String>) -> Self {
        Self {
            spec,
            passed: true,
            detail: detail.into(),
            error: None,
        }
    }

    pub fn fail(spec: AssertionSpec, error: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            spec,
            passed: false,
            detail: detail.into(),
            error: Some(error),
        }
    }
}

/// Render a mode the way `chmod` accepts it (`0755`).
pub fn format_mode(mode: u32) -> String {
    format!("{mode:04o}")
}
