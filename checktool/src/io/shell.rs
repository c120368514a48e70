//! Shell-script probes over a local shell, `ssh`, or a container CLI.
//!
//! Every probe is a short POSIX `sh` script. Arguments are single-quoted
//! before they are embedded, and scripts only read state (`test`, `stat`,
//! `cat`, `id`, `rpm -q`, `dpkg-query -W`).

use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{CommandResult, FileStat, PackageInfo, UserInfo};
use crate::io::backend::{BackendError, HostBackend};
use crate::io::process::run_command_with_timeout;
use crate::io::target::Target;

/// Printed by probe scripts when the probed object does not exist.
const MISSING_MARKER: &str = "checktool:missing";
/// Exit status `read_file` uses for a missing path.
const MISSING_EXIT: i32 = 3;
/// `ssh` reserves 255 for its own errors.
const SSH_TRANSPORT_EXIT: i32 = 255;
/// Container CLIs (`podman`, `docker run`) exit 125 when the CLI itself fails.
const CONTAINER_TRANSPORT_EXIT: i32 = 125;
const DOCKER_DAEMON_ERROR: &str = "Error response from daemon";
const SSH_CONTROL_PERSIST_SECS: u64 = 60;
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Which package database to query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerChoice {
    /// Probe the target once: `dpkg-query` first, then `rpm`.
    #[default]
    Auto,
    Rpm,
    Dpkg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Rpm,
    Dpkg,
}

/// Tunables for [`ShellBackend`].
#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// Deadline for each probe process.
    pub timeout: Duration,
    /// Truncate probe stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    pub package_manager: PackageManagerChoice,
    /// Container client binary (`docker`, `podman`).
    pub container_cli: String,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            output_limit_bytes: 1_000_000,
            package_manager: PackageManagerChoice::Auto,
            container_cli: "docker".to_string(),
        }
    }
}

/// How a probe script reaches the target.
#[derive(Debug)]
enum Transport {
    Local,
    Ssh {
        destination: String,
        port: Option<u16>,
        control: ControlSocket,
    },
    Container {
        cli: String,
        id: String,
    },
}

/// Multiplexing socket so the whole run shares one SSH connection.
#[derive(Debug)]
struct ControlSocket {
    // Removed (with the socket) when the backend is dropped.
    _dir: TempDir,
    path: PathBuf,
}

impl Transport {
    fn command(&self, script: &str) -> Command {
        match self {
            Transport::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
            Transport::Ssh {
                destination,
                port,
                control,
            } => {
                let mut cmd = ssh_base(destination, *port, control);
                cmd.arg(format!("sh -c {}", shell_quote(script)));
                cmd
            }
            Transport::Container { cli, id } => {
                let mut cmd = Command::new(cli);
                cmd.arg("exec").arg(id).arg("sh").arg("-c").arg(script);
                cmd
            }
        }
    }

    fn is_transport_failure(&self, code: Option<i32>, stderr: &str) -> bool {
        match self {
            Transport::Local => false,
            Transport::Ssh { .. } => code == Some(SSH_TRANSPORT_EXIT),
            Transport::Container { .. } => {
                code == Some(CONTAINER_TRANSPORT_EXIT)
                    || (code != Some(0) && stderr.trim_start().starts_with(DOCKER_DAEMON_ERROR))
            }
        }
    }
}

fn ssh_base(destination: &str, port: Option<u16>, control: &ControlSocket) -> Command {
    let mut cmd = Command::new("ssh");
    cmd.arg("-o")
        .arg("BatchMode=yes")
        .arg("-o")
        .arg("ControlMaster=auto")
        .arg("-o")
        .arg(format!("ControlPath={}", control.path.display()))
        .arg("-o")
        .arg(format!("ControlPersist={SSH_CONTROL_PERSIST_SECS}"));
    if let Some(port) = port {
        cmd.arg("-p").arg(port.to_string());
    }
    cmd.arg("--").arg(destination);
    cmd
}

/// [`HostBackend`] that runs probe scripts through a [`Target`]'s transport.
#[derive(Debug)]
pub struct ShellBackend {
    target: Target,
    transport: Transport,
    options: ShellOptions,
    package_manager: OnceLock<PackageManager>,
}

impl ShellBackend {
    pub fn new(target: Target, options: ShellOptions) -> Result<Self> {
        let transport = match &target {
            Target::Local => Transport::Local,
            Target::Ssh { port, .. } => {
                let dir = tempfile::Builder::new()
                    .prefix("checktool-ssh")
                    .tempdir()
                    .context("create ssh control directory")?;
                let path = dir.path().join("cm");
                Transport::Ssh {
                    destination: target.ssh_destination().unwrap_or_default(),
                    port: *port,
                    control: ControlSocket { _dir: dir, path },
                }
            }
            Target::Container { id } => Transport::Container {
                cli: options.container_cli.clone(),
                id: id.clone(),
            },
        };
        let package_manager = OnceLock::new();
        match options.package_manager {
            PackageManagerChoice::Auto => {}
            PackageManagerChoice::Rpm => {
                let _ = package_manager.set(PackageManager::Rpm);
            }
            PackageManagerChoice::Dpkg => {
                let _ = package_manager.set(PackageManager::Dpkg);
            }
        }
        Ok(Self {
            target,
            transport,
            options,
            package_manager,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn exec(&self, script: &str) -> Result<CommandResult, BackendError> {
        let cmd = self.transport.command(script);
        let output =
            run_command_with_timeout(cmd, self.options.timeout, self.options.output_limit_bytes)
                .map_err(|err| BackendError::Unavailable(format!("{err:#}")))?;
        if output.timed_out {
            return Err(BackendError::Timeout(self.options.timeout));
        }
        let stderr = output.stderr_lossy();
        let code = output.status.code();
        if self.transport.is_transport_failure(code, &stderr) {
            let reason = first_line(&stderr)
                .map(str::to_string)
                .unwrap_or_else(|| format!("transport exited with status {code:?}"));
            return Err(BackendError::Unavailable(reason));
        }
        Ok(CommandResult {
            exit_status: code.unwrap_or(-1),
            stdout: output.stdout_lossy(),
            stderr,
        })
    }

    fn package_manager(&self) -> Result<PackageManager, BackendError> {
        if let Some(manager) = self.package_manager.get() {
            return Ok(*manager);
        }
        let output = self.exec(
            "if command -v dpkg-query >/dev/null 2>&1; then echo dpkg; \
             elif command -v rpm >/dev/null 2>&1; then echo rpm; \
             else echo none; fi",
        )?;
        let detected = match output.stdout.trim() {
            "dpkg" => PackageManager::Dpkg,
            "rpm" => PackageManager::Rpm,
            other => {
                return Err(BackendError::Probe(format!(
                    "no supported package manager on target (rpm, dpkg-query): {other}"
                )));
            }
        };
        info!(manager = ?detected, "detected package manager");
        // Concurrent detections agree; the first one wins.
        Ok(*self.package_manager.get_or_init(|| detected))
    }
}

impl HostBackend for ShellBackend {
    #[instrument(skip_all, fields(target = %self.target))]
    fn connect(&self) -> Result<(), BackendError> {
        let output = self.exec("true")?;
        if output.exit_status != 0 {
            return Err(BackendError::Unavailable(
                first_line(&output.stderr)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("connect probe exited with {}", output.exit_status)),
            ));
        }
        debug!("connected");
        Ok(())
    }

    fn run_command(&self, cmd: &str) -> Result<CommandResult, BackendError> {
        self.exec(cmd)
    }

    fn stat_file(&self, path: &str) -> Result<FileStat, BackendError> {
        let p = shell_quote(path);
        let output = self.exec(&format!(
            "if [ -e {p} ]; then stat -c %a -- {p}; else echo {MISSING_MARKER}; fi"
        ))?;
        parse_stat(&output)
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, BackendError> {
        let p = shell_quote(path);
        let output = self.exec(&format!(
            "if [ -e {p} ]; then cat -- {p}; else echo {MISSING_MARKER} >&2; exit {MISSING_EXIT}; fi"
        ))?;
        match output.exit_status {
            0 => Ok(Some(output.stdout)),
            MISSING_EXIT if output.stderr.trim() == MISSING_MARKER => Ok(None),
            status => Err(probe_error("cat", status, &output.stderr)),
        }
    }

    fn package_info(&self, name: &str) -> Result<PackageInfo, BackendError> {
        let n = shell_quote(name);
        match self.package_manager()? {
            PackageManager::Rpm => {
                let output = self.exec(&format!("rpm -q --quiet {n}"))?;
                match output.exit_status {
                    0 => Ok(PackageInfo { is_installed: true }),
                    1 => Ok(PackageInfo {
                        is_installed: false,
                    }),
                    status => Err(probe_error("rpm -q", status, &output.stderr)),
                }
            }
            PackageManager::Dpkg => {
                let output = self.exec(&format!("dpkg-query -W -f '${{Status}}\\n' {n}"))?;
                match output.exit_status {
                    0 => Ok(PackageInfo {
                        is_installed: dpkg_status_installed(&output.stdout),
                    }),
                    1 => Ok(PackageInfo {
                        is_installed: false,
                    }),
                    status => Err(probe_error("dpkg-query", status, &output.stderr)),
                }
            }
        }
    }

    fn user_info(&self, name: &str) -> Result<UserInfo, BackendError> {
        let n = shell_quote(name);
        let output = self.exec(&format!(
            "if id -u -- {n} >/dev/null 2>&1; then id -nG -- {n}; else echo {MISSING_MARKER}; fi"
        ))?;
        parse_user(&output)
    }

    fn release(&self) {
        let Transport::Ssh {
            destination,
            port,
            control,
        } = &self.transport
        else {
            return;
        };
        if !control.path.exists() {
            return;
        }
        let mut cmd = ssh_base(destination, *port, control);
        cmd.arg("-O").arg("exit");
        match run_command_with_timeout(cmd, RELEASE_TIMEOUT, 4096) {
            Ok(output) if output.status.success() => debug!("ssh control master closed"),
            Ok(output) => warn!(stderr = %output.stderr_lossy().trim(), "ssh -O exit failed"),
            Err(err) => warn!(err = %err, "ssh -O exit failed"),
        }
    }
}

/// Quote `value` as a single `sh` word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn parse_stat(output: &CommandResult) -> Result<FileStat, BackendError> {
    if output.exit_status != 0 {
        return Err(probe_error("stat", output.exit_status, &output.stderr));
    }
    let raw = output.stdout.trim();
    if raw == MISSING_MARKER {
        return Ok(FileStat::missing());
    }
    u32::from_str_radix(raw, 8)
        .map(FileStat::with_mode)
        .map_err(|_| BackendError::Probe(format!("unexpected stat output '{raw}'")))
}

fn parse_user(output: &CommandResult) -> Result<UserInfo, BackendError> {
    if output.exit_status != 0 {
        return Err(probe_error("id", output.exit_status, &output.stderr));
    }
    if output.stdout.trim() == MISSING_MARKER {
        return Ok(UserInfo::missing());
    }
    Ok(UserInfo {
        exists: true,
        groups: output
            .stdout
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    })
}

/// `Status` is `want flag state`; any line with state `installed` counts
/// (multi-arch packages print one line per architecture).
fn dpkg_status_installed(stdout: &str) -> bool {
    stdout
        .lines()
        .any(|line| line.split_whitespace().nth(2) == Some("installed"))
}

fn probe_error(probe: &str, status: i32, stderr: &str) -> BackendError {
    match first_line(stderr) {
        Some(line) => BackendError::Probe(format!("{probe} exited with status {status}: {line}")),
        None => BackendError::Probe(format!("{probe} exited with status {status}")),
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}
