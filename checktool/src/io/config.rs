//! Check files: run settings plus the ordered list of assertions (TOML).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::spec::{AssertionSpec, ConfigError, validate_specs};
use crate::engine::EngineConfig;
use crate::io::retry::{MAX_ATTEMPTS, RetryPolicy};
use crate::io::shell::{PackageManagerChoice, ShellOptions};

/// Upper bound for both timeouts: one day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Run settings. Missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Per-assertion wall-clock budget in seconds.
    pub assertion_timeout_secs: u64,

    /// Whole-run wall-clock budget in seconds.
    pub run_timeout_secs: u64,

    /// Worker threads; `0` = one per available processor, capped at 8.
    pub workers: usize,

    /// Truncate probe stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub package_manager: PackageManagerChoice,

    /// Container client used for `container:<id>` targets.
    pub container_cli: String,

    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assertion_timeout_secs: 10,
            run_timeout_secs: 10 * 60,
            workers: 0,
            output_limit_bytes: 1_000_000,
            package_manager: PackageManagerChoice::Auto,
            container_cli: "docker".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("assertion_timeout_secs", self.assertion_timeout_secs)?;
        check_timeout("run_timeout_secs", self.run_timeout_secs)?;
        if self.output_limit_bytes == 0 {
            return Err(invalid("output_limit_bytes", "must be > 0"));
        }
        if self.container_cli.trim().is_empty() {
            return Err(invalid("container_cli", "must be non-empty"));
        }
        if self.retry.attempts == 0 || self.retry.attempts > MAX_ATTEMPTS {
            return Err(ConfigError::InvalidSetting {
                name: "retry.attempts",
                reason: format!("must be between 1 and {MAX_ATTEMPTS}"),
            });
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            assertion_timeout: Duration::from_secs(self.assertion_timeout_secs),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
        }
    }

    pub fn shell_options(&self) -> ShellOptions {
        ShellOptions {
            timeout: Duration::from_secs(self.assertion_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
            package_manager: self.package_manager,
            container_cli: self.container_cli.clone(),
        }
    }
}

fn check_timeout(name: &'static str, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 || secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::InvalidSetting {
            name,
            reason: format!("must be between 1 and {MAX_TIMEOUT_SECS}"),
        });
    }
    Ok(())
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name,
        reason: reason.to_string(),
    }
}

/// A parsed and validated check file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CheckFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub checks: Vec<AssertionSpec>,
}

impl CheckFile {
    /// Load and validate a check file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read check file {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("load {}", path.display()))
    }

    /// Parse and validate check-file text.
    pub fn parse_str(contents: &str) -> Result<Self> {
        let file: CheckFile = toml::from_str(contents).context("parse check file")?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;
        validate_specs(&self.checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::Kind;

    #[test]
    fn load_applies_setting_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("checks.toml");
        fs::write(
            &path,
            r#"
[[checks]]
kind = "file_exists"
path = "/etc/ssh/sshd_config"
"#,
        )
        .expect("write");

        let file = CheckFile::load(&path).expect("load");
        assert_eq!(file.settings, Settings::default());
        assert_eq!(file.checks.len(), 1);
    }

    #[test]
    fn parses_settings_and_retry() {
        let file = CheckFile::parse_str(
            r#"
[settings]
assertion_timeout_secs = 3
workers = 2
package_manager = "rpm"

[settings.retry]
attempts = 3
backoff_ms = 50

[[checks]]
kind = "package_installed"
name = "git"
"#,
        )
        .expect("parse");
        assert_eq!(file.settings.assertion_timeout_secs, 3);
        assert_eq!(file.settings.workers, 2);
        assert_eq!(file.settings.package_manager, PackageManagerChoice::Rpm);
        assert_eq!(
            file.settings.retry,
            RetryPolicy {
                attempts: 3,
                backoff_ms: 50
            }
        );
        assert_eq!(
            file.settings.engine_config().assertion_timeout,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn rejects_invalid_settings() {
        let err = CheckFile::parse_str(
            r#"
[settings]
run_timeout_secs = 0

[[checks]]
kind = "package_installed"
name = "git"
"#,
        )
        .expect_err("zero timeout");
        assert!(format!("{err:#}").contains("run_timeout_secs"));

        let err = CheckFile::parse_str(
            r#"
[settings.retry]
attempts = 9

[[checks]]
kind = "package_installed"
name = "git"
"#,
        )
        .expect_err("too many attempts");
        assert!(format!("{err:#}").contains("retry.attempts"));
    }

    #[test]
    fn rejects_timeouts_beyond_one_day() {
        let err = CheckFile::parse_str(
            r#"
[settings]
run_timeout_secs = 9223372036854775807

[[checks]]
kind = "package_installed"
name = "git"
"#,
        )
        .expect_err("huge run timeout");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidSetting {
                name: "run_timeout_secs",
                ..
            })
        ));

        let mut settings = Settings {
            assertion_timeout_secs: MAX_TIMEOUT_SECS + 1,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
        settings.assertion_timeout_secs = MAX_TIMEOUT_SECS;
        assert_eq!(settings.validate(), Ok(()));
    }

    #[test]
    fn rejects_empty_and_malformed_checks() {
        let err = CheckFile::parse_str("[settings]\nworkers = 1\n").expect_err("no checks");
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::NoChecks)
        );

        let err = CheckFile::parse_str(
            r#"
[[checks]]
kind = "user_in_group"
user = "gpadmin"
group = ""
"#,
        )
        .expect_err("empty group");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidCheck {
                index: 0,
                kind: Kind::UserInGroup,
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let err = CheckFile::parse_str(
            r#"
[setting]
workers = 1

[[checks]]
kind = "package_installed"
name = "git"
"#,
        )
        .expect_err("typo");
        assert!(format!("{err:#}").contains("setting"));
    }
}
