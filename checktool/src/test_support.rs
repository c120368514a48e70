//! Test-only helpers: an in-memory backend and spec builders.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::core::spec::AssertionSpec;
use crate::core::types::{CommandResult, FileStat, PackageInfo, UserInfo};
use crate::io::backend::{BackendError, HostBackend};

#[derive(Debug, Clone)]
struct FakeFile {
    mode: u32,
    contents: String,
}

/// Backend answering probes from in-memory tables.
///
/// Probes are keyed as `package:<name>`, `user:<name>`, `file:<path>` and
/// `command:<cmd>`; failures and delays are injected per key.
#[derive(Debug, Default)]
pub struct FakeBackend {
    packages: BTreeSet<String>,
    users: BTreeMap<String, BTreeSet<String>>,
    files: BTreeMap<String, FakeFile>,
    commands: BTreeMap<String, CommandResult>,
    unavailable: BTreeSet<String>,
    delays: BTreeMap<String, Duration>,
    flaky: Mutex<BTreeMap<String, u32>>,
    connect_error: Option<String>,
    calls: AtomicUsize,
    released: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, name: &str) -> Self {
        self.packages.insert(name.to_string());
        self
    }

    pub fn with_user(mut self, name: &str, groups: &[&str]) -> Self {
        self.users.insert(
            name.to_string(),
            groups.iter().map(|group| group.to_string()).collect(),
        );
        self
    }

    pub fn with_file(self, path: &str, mode: u32) -> Self {
        self.with_file_contents(path, mode, "")
    }

    pub fn with_file_contents(mut self, path: &str, mode: u32, contents: &str) -> Self {
        self.files.insert(
            path.to_string(),
            FakeFile {
                mode,
                contents: contents.to_string(),
            },
        );
        self
    }

    pub fn with_command(mut self, cmd: &str, exit_status: i32, stdout: &str) -> Self {
        self.commands.insert(
            cmd.to_string(),
            CommandResult {
                exit_status,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
        self
    }

    /// Every probe of the package raises `BackendError::Unavailable`.
    pub fn unavailable_package(mut self, name: &str) -> Self {
        self.unavailable.insert(format!("package:{name}"));
        self
    }

    pub fn unavailable_command(mut self, cmd: &str) -> Self {
        self.unavailable.insert(format!("command:{cmd}"));
        self
    }

    /// The first `failures` probes of the path are unavailable, later ones succeed.
    pub fn flaky_stat(self, path: &str, failures: u32) -> Self {
        if let Ok(mut flaky) = self.flaky.lock() {
            flaky.insert(format!("file:{path}"), failures);
        }
        self
    }

    /// Sleep before answering any probe of `key` (e.g. `package:git`).
    pub fn with_delay(mut self, key: &str, delay: Duration) -> Self {
        self.delays.insert(key.to_string(), delay);
        self
    }

    pub fn failing_connect(mut self, reason: &str) -> Self {
        self.connect_error = Some(reason.to_string());
        self
    }

    /// Number of probes answered (connect excluded).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn probe(&self, key: String) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&key) {
            thread::sleep(*delay);
        }
        if self.unavailable.contains(&key) {
            return Err(BackendError::Unavailable(format!("{key}: connection reset")));
        }
        if let Ok(mut flaky) = self.flaky.lock()
            && let Some(remaining) = flaky.get_mut(&key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(BackendError::Unavailable(format!("{key}: flaky")));
        }
        Ok(())
    }
}

impl HostBackend for FakeBackend {
    fn connect(&self) -> Result<(), BackendError> {
        match &self.connect_error {
            Some(reason) => Err(BackendError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn run_command(&self, cmd: &str) -> Result<CommandResult, BackendError> {
        self.probe(format!("command:{cmd}"))?;
        Ok(self.commands.get(cmd).cloned().unwrap_or(CommandResult {
            exit_status: 127,
            stdout: String::new(),
            stderr: format!("sh: {cmd}: not found"),
        }))
    }

    fn stat_file(&self, path: &str) -> Result<FileStat, BackendError> {
        self.probe(format!("file:{path}"))?;
        Ok(match self.files.get(path) {
            Some(file) => FileStat::with_mode(file.mode),
            None => FileStat::missing(),
        })
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, BackendError> {
        self.probe(format!("file:{path}"))?;
        Ok(self.files.get(path).map(|file| file.contents.clone()))
    }

    fn package_info(&self, name: &str) -> Result<PackageInfo, BackendError> {
        self.probe(format!("package:{name}"))?;
        Ok(PackageInfo {
            is_installed: self.packages.contains(name),
        })
    }

    fn user_info(&self, name: &str) -> Result<UserInfo, BackendError> {
        self.probe(format!("user:{name}"))?;
        Ok(match self.users.get(name) {
            Some(groups) => UserInfo {
                exists: true,
                groups: groups.clone(),
            },
            None => UserInfo::missing(),
        })
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

pub fn package(name: &str) -> AssertionSpec {
    AssertionSpec::PackageInstalled {
        name: name.to_string(),
    }
}

pub fn user_in_group(user: &str, group: &str) -> AssertionSpec {
    AssertionSpec::UserInGroup {
        user: user.to_string(),
        group: group.to_string(),
    }
}

pub fn file_exists(path: &str) -> AssertionSpec {
    AssertionSpec::FileExists {
        path: path.to_string(),
    }
}

pub fn file_mode(path: &str, expected_mode: u32) -> AssertionSpec {
    AssertionSpec::FileMode {
        path: path.to_string(),
        expected_mode,
    }
}

pub fn command_contains(cmd: &str, substring: &str) -> AssertionSpec {
    AssertionSpec::CommandOutputContains {
        cmd: cmd.to_string(),
        substring: substring.to_string(),
    }
}

pub fn user_exists(name: &str) -> AssertionSpec {
    AssertionSpec::UserExists {
        name: name.to_string(),
    }
}

pub fn file_contains(path: &str, substring: &str) -> AssertionSpec {
    AssertionSpec::FileContains {
        path: path.to_string(),
        substring: substring.to_string(),
    }
}
