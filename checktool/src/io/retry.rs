//! Bounded retry-with-backoff around transport-sensitive probes.
//!
//! Only `run_command` and `stat_file` are retried, and only when the backend
//! reports the target as unavailable. Predicate outcomes are never retried:
//! a check reflects the state the target is in right now.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::types::{CommandResult, FileStat, PackageInfo, UserInfo};
use crate::io::backend::{BackendError, HostBackend};

/// Upper bound on attempts, whatever the configuration asks for.
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per probe (1 = no retry).
    pub attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    pub fn is_enabled(&self) -> bool {
        self.attempts > 1
    }

    fn delay_before(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Wraps a backend and retries transient failures of `run_command`/`stat_file`.
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: HostBackend> RetryingBackend<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        let policy = RetryPolicy {
            attempts: policy.attempts.clamp(1, MAX_ATTEMPTS),
            ..policy
        };
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn with_retry<T>(
        &self,
        probe: &str,
        subject: &str,
        mut call: impl FnMut() -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut attempt = 1;
        loop {
            match call() {
                Err(err) if err.is_transient() && attempt < self.policy.attempts => {
                    let delay = self.policy.delay_before(attempt);
                    warn!(
                        probe,
                        subject,
                        attempt,
                        max_attempts = self.policy.attempts,
                        delay_ms = delay.as_millis() as u64,
                        err = %err,
                        "transient backend failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl<B: HostBackend> HostBackend for RetryingBackend<B> {
    fn connect(&self) -> Result<(), BackendError> {
        self.inner.connect()
    }

    fn run_command(&self, cmd: &str) -> Result<CommandResult, BackendError> {
        self.with_retry("run_command", cmd, || self.inner.run_command(cmd))
    }

    fn stat_file(&self, path: &str) -> Result<FileStat, BackendError> {
        self.with_retry("stat_file", path, || self.inner.stat_file(path))
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, BackendError> {
        self.inner.read_file(path)
    }

    fn package_info(&self, name: &str) -> Result<PackageInfo, BackendError> {
        self.inner.package_info(name)
    }

    fn user_info(&self, name: &str) -> Result<UserInfo, BackendError> {
        self.inner.user_info(name)
    }

    fn release(&self) {
        self.inner.release();
    }
}
