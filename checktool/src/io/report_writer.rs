//! Machine-readable JSON report.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::core::report::Report;
use crate::core::spec::Kind;
use crate::core::types::{CheckResult, ErrorKind};

/// Where `--json` sends the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonDestination {
    Stdout,
    File(PathBuf),
}

impl JsonDestination {
    /// `-` means stdout; anything else is a file path.
    pub fn parse(raw: &str) -> Self {
        if raw == "-" {
            JsonDestination::Stdout
        } else {
            JsonDestination::File(PathBuf::from(raw))
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JsonReport {
    pub started_at: String,
    pub target: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<JsonResult>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JsonResult {
    pub kind: Kind,
    pub params: BTreeMap<String, String>,
    pub passed: bool,
    pub detail: String,
    pub error: Option<ErrorKind>,
}

impl From<&CheckResult> for JsonResult {
    fn from(result: &CheckResult) -> Self {
        Self {
            kind: result.spec.kind(),
            params: result
                .spec
                .params()
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
            passed: result.passed,
            detail: result.detail.clone(),
            error: result.error,
        }
    }
}

impl JsonReport {
    pub fn new(
        target: &str,
        started_at: DateTime<Utc>,
        duration: Duration,
        results: &[CheckResult],
        report: &Report,
    ) -> Self {
        Self {
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            target: target.to_string(),
            total: report.total,
            passed: report.passed,
            failed: report.failed,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            results: results.iter().map(JsonResult::from).collect(),
        }
    }
}

pub fn write_report(destination: &JsonDestination, report: &JsonReport) -> Result<()> {
    let mut contents = serde_json::to_string_pretty(report).context("serialize report")?;
    contents.push('\n');
    match destination {
        JsonDestination::Stdout => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(contents.as_bytes())
                .context("write report to stdout")?;
            stdout.flush().context("flush stdout")
        }
        JsonDestination::File(path) => write_atomic(path, &contents),
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::summarize;
    use crate::test_support::{file_mode, package};
    use chrono::TimeZone;

    fn sample() -> (Vec<CheckResult>, Report) {
        let results = vec![
            CheckResult::pass(package("git"), "package git is installed"),
            CheckResult::fail(
                file_mode("/tmp/init_system.sh", 0o777),
                ErrorKind::AssertionFailed,
                "/tmp/init_system.sh has mode 0755, expected 0777",
            ),
        ];
        let report = summarize(&results);
        (results, report)
    }

    #[test]
    fn destination_dash_is_stdout() {
        assert_eq!(JsonDestination::parse("-"), JsonDestination::Stdout);
        assert_eq!(
            JsonDestination::parse("out/report.json"),
            JsonDestination::File(PathBuf::from("out/report.json"))
        );
    }

    #[test]
    fn report_serializes_counts_and_params() {
        let (results, report) = sample();
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let json = JsonReport::new("local", started, Duration::from_millis(1500), &results, &report);

        let value = serde_json::to_value(&json).expect("serialize");
        assert_eq!(value["started_at"], "2024-05-01T12:00:00Z");
        assert_eq!(value["total"], 2);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["duration_ms"], 1500);
        assert_eq!(value["results"][0]["kind"], "package_installed");
        assert_eq!(value["results"][0]["error"], serde_json::Value::Null);
        assert_eq!(value["results"][1]["params"]["expected_mode"], "0777");
        assert_eq!(value["results"][1]["error"], "assertion_failed");
    }

    #[test]
    fn file_destination_is_written_atomically() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reports").join("run.json");
        let (results, report) = sample();
        let json = JsonReport::new("local", Utc::now(), Duration::ZERO, &results, &report);

        write_report(&JsonDestination::File(path.clone()), &json).expect("write");

        let raw = fs::read_to_string(&path).expect("read");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(parsed["passed"], 1);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
