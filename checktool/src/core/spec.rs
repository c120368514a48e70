//! Declarative assertion records and their load-time validation.
//!
//! Records are read from TOML `[[checks]]` tables tagged by `kind`:
//!
//! ```toml
//! [[checks]]
//! kind = "user_in_group"
//! user = "gpadmin"
//! group = "wheel"
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::format_mode;

/// Highest permission value accepted for `file_mode.expected_mode`.
pub const MAX_MODE: u32 = 0o7777;

/// Discriminant of an [`AssertionSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    PackageInstalled,
    UserExists,
    UserInGroup,
    FileExists,
    FileMode,
    FileContains,
    CommandOutputContains,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::PackageInstalled => "package_installed",
            Kind::UserExists => "user_exists",
            Kind::UserInGroup => "user_in_group",
            Kind::FileExists => "file_exists",
            Kind::FileMode => "file_mode",
            Kind::FileContains => "file_contains",
            Kind::CommandOutputContains => "command_output_contains",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One host-state check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum AssertionSpec {
    PackageInstalled {
        name: String,
    },
    UserExists {
        name: String,
    },
    UserInGroup {
        user: String,
        group: String,
    },
    FileExists {
        path: String,
    },
    FileMode {
        path: String,
        #[serde(deserialize_with = "deserialize_mode")]
        expected_mode: u32,
    },
    /// `substring` is matched literally, not as a regular expression.
    FileContains {
        path: String,
        substring: String,
    },
    CommandOutputContains {
        cmd: String,
        substring: String,
    },
}

/// Malformed or incomplete configuration detected before any assertion runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("checks must be a non-empty array")]
    NoChecks,
    #[error("checks[{index}] ({kind}): {reason}")]
    InvalidCheck {
        index: usize,
        kind: Kind,
        reason: String,
    },
    #[error("settings.{name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),
}

impl AssertionSpec {
    pub fn kind(&self) -> Kind {
        match self {
            AssertionSpec::PackageInstalled { .. } => Kind::PackageInstalled,
            AssertionSpec::UserExists { .. } => Kind::UserExists,
            AssertionSpec::UserInGroup { .. } => Kind::UserInGroup,
            AssertionSpec::FileExists { .. } => Kind::FileExists,
            AssertionSpec::FileMode { .. } => Kind::FileMode,
            AssertionSpec::FileContains { .. } => Kind::FileContains,
            AssertionSpec::CommandOutputContains { .. } => Kind::CommandOutputContains,
        }
    }

    /// The thing being checked, as shown in the one-line report.
    pub fn target(&self) -> String {
        match self {
            AssertionSpec::PackageInstalled { name } | AssertionSpec::UserExists { name } => {
                name.clone()
            }
            AssertionSpec::UserInGroup { user, group } => format!("{user}:{group}"),
            AssertionSpec::FileExists { path }
            | AssertionSpec::FileMode { path, .. }
            | AssertionSpec::FileContains { path, .. } => path.clone(),
            AssertionSpec::CommandOutputContains { cmd, .. } => cmd.clone(),
        }
    }

    /// Kind-specific fields as strings, keyed by field name.
    pub fn params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        match self {
            AssertionSpec::PackageInstalled { name } | AssertionSpec::UserExists { name } => {
                params.insert("name", name.clone());
            }
            AssertionSpec::UserInGroup { user, group } => {
                params.insert("user", user.clone());
                params.insert("group", group.clone());
            }
            AssertionSpec::FileExists { path } => {
                params.insert("path", path.clone());
            }
            AssertionSpec::FileMode {
                path,
                expected_mode,
            } => {
                params.insert("path", path.clone());
                params.insert("expected_mode", format_mode(*expected_mode));
            }
            AssertionSpec::FileContains { path, substring } => {
                params.insert("path", path.clone());
                params.insert("substring", substring.clone());
            }
            AssertionSpec::CommandOutputContains { cmd, substring } => {
                params.insert("cmd", cmd.clone());
                params.insert("substring", substring.clone());
            }
        }
        params
    }

    /// Check that the fields required by `kind` are usable.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AssertionSpec::PackageInstalled { name } | AssertionSpec::UserExists { name } => {
                require_token("name", name)
            }
            AssertionSpec::UserInGroup { user, group } => {
                require_token("user", user)?;
                require_token("group", group)
            }
            AssertionSpec::FileExists { path } => require_path(path),
            AssertionSpec::FileMode {
                path,
                expected_mode,
            } => {
                require_path(path)?;
                if *expected_mode > MAX_MODE {
                    return Err(format!(
                        "expected_mode {expected_mode:o} exceeds {MAX_MODE:o}"
                    ));
                }
                Ok(())
            }
            AssertionSpec::FileContains { path, substring } => {
                require_path(path)?;
                require_non_empty("substring", substring)
            }
            AssertionSpec::CommandOutputContains { cmd, substring } => {
                require_non_empty("cmd", cmd)?;
                require_non_empty("substring", substring)
            }
        }
    }
}

/// Validate an ordered list of specs, reporting the first offending index.
pub fn validate_specs(specs: &[AssertionSpec]) -> Result<(), ConfigError> {
    if specs.is_empty() {
        return Err(ConfigError::NoChecks);
    }
    for (index, spec) in specs.iter().enumerate() {
        spec.validate()
            .map_err(|reason| ConfigError::InvalidCheck {
                index,
                kind: spec.kind(),
                reason,
            })?;
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must be non-empty"));
    }
    Ok(())
}

// Names end up as a single argument to rpm/dpkg-query/id.
fn require_token(field: &str, value: &str) -> Result<(), String> {
    require_non_empty(field, value)?;
    if value.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(format!("{field} must not contain whitespace"));
    }
    if value.starts_with('-') {
        return Err(format!("{field} must not start with '-'"));
    }
    Ok(())
}

fn require_path(path: &str) -> Result<(), String> {
    require_non_empty("path", path)?;
    if !path.starts_with('/') {
        return Err(format!("path must be absolute, got '{path}'"));
    }
    if path.contains('\0') {
        return Err("path must not contain NUL".to_string());
    }
    Ok(())
}

/// Parse an octal mode written as `"0755"`, `"755"` or `"0o755"`.
pub fn parse_mode(raw: &str) -> Result<u32, String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(format!("invalid octal mode '{raw}'"));
    }
    u32::from_str_radix(digits, 8).map_err(|_| format!("invalid octal mode '{raw}'"))
}

/// Accepts either a TOML integer (`0o755`) or an octal string (`"0755"`).
fn deserialize_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    struct ModeVisitor;

    impl Visitor<'_> for ModeVisitor {
        type Value = u32;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an octal string like \"0755\" or an integer like 0o755")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u32, E> {
            u32::try_from(value).map_err(|_| E::custom(format!("mode {value} out of range")))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u32, E> {
            u32::try_from(value).map_err(|_| E::custom(format!("mode {value} out of range")))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u32, E> {
            parse_mode(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(ModeVisitor)
}
