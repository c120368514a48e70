//! Pass/fail predicates over probe answers.
//!
//! Each function turns the answer of one backend probe into a [`Verdict`].
//! Details are phrased so a failing line in the report says what was found.

use crate::core::types::{CommandResult, FileStat, PackageInfo, UserInfo, format_mode};

/// Predicate outcome before it is attached to its spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub detail: String,
}

impl Verdict {
    fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

pub fn package_installed(name: &str, info: &PackageInfo) -> Verdict {
    if info.is_installed {
        Verdict::pass(format!("package {name} is installed"))
    } else {
        Verdict::fail(format!("package {name} is not installed"))
    }
}

pub fn user_exists(name: &str, info: &UserInfo) -> Verdict {
    if info.exists {
        Verdict::pass(format!("user {name} exists"))
    } else {
        Verdict::fail(format!("user {name} is missing"))
    }
}

pub fn user_in_group(user: &str, group: &str, info: &UserInfo) -> Verdict {
    if !info.exists {
        return Verdict::fail(format!("user {user} is missing"));
    }
    if info.groups.contains(group) {
        return Verdict::pass(format!("user {user} is in group {group}"));
    }
    let groups: Vec<&str> = info.groups.iter().map(String::as_str).collect();
    Verdict::fail(format!(
        "user {user} exists but is not in group {group} (groups: {})",
        groups.join(",")
    ))
}

pub fn file_exists(path: &str, stat: &FileStat) -> Verdict {
    if stat.exists {
        Verdict::pass(format!("{path} exists"))
    } else {
        Verdict::fail(format!("{path} does not exist"))
    }
}

pub fn file_mode(path: &str, expected: u32, stat: &FileStat) -> Verdict {
    if !stat.exists {
        return Verdict::fail(format!("{path} does not exist"));
    }
    match stat.mode {
        Some(actual) if actual == expected => {
            Verdict::pass(format!("{path} has mode {}", format_mode(actual)))
        }
        Some(actual) => Verdict::fail(format!(
            "{path} has mode {}, expected {}",
            format_mode(actual),
            format_mode(expected)
        )),
        None => Verdict::fail(format!("{path} exists but its mode is unknown")),
    }
}

/// Literal substring match (no regex). `contents` is `None` when the file does not exist.
pub fn file_contains(path: &str, substring: &str, contents: Option<&str>) -> Verdict {
    match contents {
        None => Verdict::fail(format!("{path} does not exist")),
        Some(text) if text.contains(substring) => {
            Verdict::pass(format!("{path} contains {substring:?}"))
        }
        Some(_) => Verdict::fail(format!("{path} does not contain {substring:?}")),
    }
}

/// A non-zero exit fails the check even when stdout holds the substring.
pub fn command_output_contains(substring: &str, output: &CommandResult) -> Verdict {
    if output.exit_status != 0 {
        let stderr = output.stderr.trim();
        return if stderr.is_empty() {
            Verdict::fail(format!("command exited with status {}", output.exit_status))
        } else {
            Verdict::fail(format!(
                "command exited with status {}: {}",
                output.exit_status,
                first_line(stderr)
            ))
        };
    }
    if output.stdout.contains(substring) {
        Verdict::pass(format!("stdout contains {substring:?}"))
    } else {
        Verdict::fail(format!("stdout does not contain {substring:?}"))
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn user(groups: &[&str]) -> UserInfo {
        UserInfo {
            exists: true,
            groups: groups.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn file_mode_requires_exact_match() {
        let verdict = file_mode("/tmp/init_system.sh", 0o755, &FileStat::with_mode(0o755));
        assert!(verdict.passed);

        let verdict = file_mode("/tmp/init_system.sh", 0o755, &FileStat::with_mode(0o644));
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("0644"), "{}", verdict.detail);

        let verdict = file_mode("/tmp/init_system.sh", 0o755, &FileStat::with_mode(0o4755));
        assert!(!verdict.passed);
    }

    #[test]
    fn file_mode_fails_when_missing() {
        let verdict = file_mode("/tmp/init_system.sh", 0o755, &FileStat::missing());
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("does not exist"));
    }

    #[test]
    fn user_in_group_distinguishes_missing_user() {
        let missing = user_in_group("gpadmin", "gpadmin", &UserInfo::missing());
        assert!(!missing.passed);
        assert_eq!(missing.detail, "user gpadmin is missing");

        let not_member = user_in_group("gpadmin", "gpadmin", &user(&["users", "wheel"]));
        assert!(!not_member.passed);
        assert!(not_member.detail.contains("exists but is not in group gpadmin"));

        let member = user_in_group("gpadmin", "gpadmin", &user(&["gpadmin", "wheel"]));
        assert!(member.passed);
    }

    #[test]
    fn command_output_contains_requires_zero_exit() {
        let ok = CommandResult {
            exit_status: 0,
            stdout: "C\nen_US.utf8\nPOSIX\n".to_string(),
            stderr: String::new(),
        };
        assert!(command_output_contains("en_US.utf8", &ok).passed);

        let nonzero = CommandResult {
            exit_status: 1,
            ..ok.clone()
        };
        let verdict = command_output_contains("en_US.utf8", &nonzero);
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("status 1"));

        let absent = CommandResult {
            stdout: "C\nPOSIX\n".to_string(),
            ..ok
        };
        assert!(!command_output_contains("en_US.utf8", &absent).passed);
    }

    #[test]
    fn file_contains_handles_missing_file() {
        let verdict = file_contains("/etc/locale.conf", "LANG=en_US.UTF-8", None);
        assert!(!verdict.passed);

        let verdict = file_contains(
            "/etc/locale.conf",
            "LANG=en_US.UTF-8",
            Some("LANG=en_US.UTF-8\n"),
        );
        assert!(verdict.passed);
    }

    #[test]
    fn file_contains_matches_literally() {
        let contents = Some("LANG=en_US.UTF-8\n");
        assert!(!file_contains("/etc/locale.conf", "LANG=en_US.UTF.8", contents).passed);
        assert!(!file_contains("/etc/locale.conf", "^LANG", contents).passed);
        assert!(file_contains("/etc/locale.conf", "en_US.UTF-8", contents).passed);
    }

    #[test]
    fn package_and_file_exists_verdicts() {
        assert!(package_installed("git", &PackageInfo { is_installed: true }).passed);
        assert!(!package_installed("git", &PackageInfo { is_installed: false }).passed);
        assert!(file_exists("/etc/localtime", &FileStat::with_mode(0o777)).passed);
        assert!(!file_exists("/etc/localtime", &FileStat::missing()).passed);
        assert!(!user_exists("gpadmin", &UserInfo::missing()).passed);
    }
}
