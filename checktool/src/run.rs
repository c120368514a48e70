//! Orchestration for `checktool run`.
//!
//! Loads the check list, opens the target, evaluates every assertion and
//! hands the results to the reporters. Any error returned from here is a
//! setup failure; assertion failures are carried in [`RunOutcome`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::report::{Report, render, summarize};
use crate::core::types::CheckResult;
use crate::engine::run_checks;
use crate::io::backend::HostBackend;
use crate::io::config::{CheckFile, Settings};
use crate::io::profiles;
use crate::io::report_writer::{JsonDestination, JsonReport, write_report};
use crate::io::retry::RetryingBackend;
use crate::io::shell::{PackageManagerChoice, ShellBackend};
use crate::io::target::Target;

/// Where the assertions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckSource {
    Config(PathBuf),
    Profile(String),
}

impl CheckSource {
    pub fn load(&self) -> Result<CheckFile> {
        match self {
            CheckSource::Config(path) => CheckFile::load(path),
            CheckSource::Profile(name) => profiles::load(name),
        }
    }
}

/// Command-line values that take precedence over `[settings]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub assertion_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    /// Extra attempts after the first one.
    pub retries: Option<u32>,
    pub package_manager: Option<PackageManagerChoice>,
    pub container_cli: Option<String>,
}

impl Overrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(secs) = self.assertion_timeout_secs {
            settings.assertion_timeout_secs = secs;
        }
        if let Some(secs) = self.run_timeout_secs {
            settings.run_timeout_secs = secs;
        }
        if let Some(retries) = self.retries {
            settings.retry.attempts = retries.saturating_add(1);
        }
        if let Some(choice) = self.package_manager {
            settings.package_manager = choice;
        }
        if let Some(cli) = &self.container_cli {
            settings.container_cli = cli.clone();
        }
    }
}

/// Load `source` and apply `overrides`, re-validating the merged settings.
pub fn load_checks(source: &CheckSource, overrides: &Overrides) -> Result<CheckFile> {
    let mut file = source.load()?;
    overrides.apply(&mut file.settings);
    file.validate().context("apply command-line overrides")?;
    Ok(file)
}

/// Results of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: Vec<CheckResult>,
    pub report: Report,
    pub duration: Duration,
    pub started_at: chrono::DateTime<Utc>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

/// Releases the backend when the run ends, however it ends.
struct ReleaseGuard(Arc<dyn HostBackend>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Run `file` against `target` through the shell transports.
pub fn run(file: &CheckFile, target: &Target) -> Result<RunOutcome> {
    let shell = ShellBackend::new(target.clone(), file.settings.shell_options())
        .with_context(|| format!("open target {target}"))?;
    let backend: Arc<dyn HostBackend> =
        Arc::new(RetryingBackend::new(shell, file.settings.retry));
    run_with_backend(file, backend, &target.to_string())
}

/// Run `file` against an already constructed backend.
pub fn run_with_backend(
    file: &CheckFile,
    backend: Arc<dyn HostBackend>,
    target: &str,
) -> Result<RunOutcome> {
    let _release = ReleaseGuard(Arc::clone(&backend));
    let started_at = Utc::now();
    let started = Instant::now();

    backend
        .connect()
        .with_context(|| format!("connect to {target}"))?;
    debug!(target, "target reachable");

    let results = run_checks(&file.checks, backend, &file.settings.engine_config())?;
    let report = summarize(&results);
    let duration = started.elapsed();
    info!(
        total = report.total,
        passed = report.passed,
        failed = report.failed,
        duration_ms = duration.as_millis() as u64,
        "run finished"
    );
    Ok(RunOutcome {
        results,
        report,
        duration,
        started_at,
    })
}

/// Write the JSON report (if requested) and print the human summary.
///
/// `--json -` replaces the human summary on stdout. Every assertion has run by
/// now, so a report that cannot be written is logged and does not change the
/// exit code.
pub fn emit(outcome: &RunOutcome, target: &str, json: Option<&JsonDestination>) {
    if let Some(destination) = json {
        let report = JsonReport::new(
            target,
            outcome.started_at,
            outcome.duration,
            &outcome.results,
            &outcome.report,
        );
        if let Err(err) = write_report(destination, &report) {
            warn!(err = %format!("{err:#}"), "json report not written");
        }
    }
    if json != Some(&JsonDestination::Stdout) {
        print!("{}", render(&outcome.results, &outcome.report));
    }
}
