//! Summary counts, exit-code policy, and the human-readable rendering.

use crate::core::types::CheckResult;
use crate::exit_codes;

/// Aggregated results of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Failing results in input order.
    pub failures: Vec<CheckResult>,
}

impl Report {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// `OK` when every assertion passed, `FAILED` otherwise.
    ///
    /// Setup failures never produce a report; the CLI maps them to `SETUP`.
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            exit_codes::OK
        } else {
            exit_codes::FAILED
        }
    }
}

pub fn summarize(results: &[CheckResult]) -> Report {
    let failures: Vec<CheckResult> = results.iter().filter(|r| !r.passed).cloned().collect();
    Report {
        total: results.len(),
        passed: results.len() - failures.len(),
        failed: failures.len(),
        failures,
    }
}

/// `PASS package_installed git: package git is installed`
pub fn render_line(result: &CheckResult) -> String {
    let status = if result.passed { "PASS" } else { "FAIL" };
    let mut line = format!(
        "{status} {} {}: {}",
        result.spec.kind(),
        result.spec.target(),
        result.detail
    );
    if let Some(error) = result.error
        && !result.passed
    {
        line.push_str(&format!(" [{error}]"));
    }
    line
}

/// One line per result in input order, then the totals line.
pub fn render(results: &[CheckResult], report: &Report) -> String {
    let mut out = String::new();
    for result in results {
        out.push_str(&render_line(result));
        out.push('\n');
    }
    out.push_str(&format!(
        "total={} passed={} failed={}\n",
        report.total, report.passed, report.failed
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::AssertionSpec;
    use crate::core::types::ErrorKind;

    fn package(name: &str) -> AssertionSpec {
        AssertionSpec::PackageInstalled {
            name: name.to_string(),
        }
    }

    #[test]
    fn summarize_counts_and_keeps_failure_order() {
        let results = vec![
            CheckResult::pass(package("git"), "ok"),
            CheckResult::fail(package("bat"), ErrorKind::AssertionFailed, "missing"),
            CheckResult::pass(package("htop"), "ok"),
            CheckResult::fail(package("lz4"), ErrorKind::Timeout, "slow"),
        ];
        let report = summarize(&results);
        assert_eq!(report.total, 4);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 2);
        let failed: Vec<String> = report.failures.iter().map(|r| r.spec.target()).collect();
        assert_eq!(failed, vec!["bat", "lz4"]);
        assert_eq!(report.exit_code(), exit_codes::FAILED);
    }

    #[test]
    fn empty_and_all_passing_exit_ok() {
        assert_eq!(summarize(&[]).exit_code(), exit_codes::OK);
        let results = vec![CheckResult::pass(package("git"), "ok")];
        assert_eq!(summarize(&results).exit_code(), exit_codes::OK);
    }

    #[test]
    fn render_is_one_line_per_result() {
        let results = vec![
            CheckResult::pass(package("git"), "package git is installed"),
            CheckResult::fail(
                package("bat"),
                ErrorKind::BackendUnavailable,
                "connection refused",
            ),
        ];
        let report = summarize(&results);
        let text = render(&results, &report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "PASS package_installed git: package git is installed",
                "FAIL package_installed bat: connection refused [backend_unavailable]",
                "total=2 passed=1 failed=1",
            ]
        );
    }
}
