//! Built-in check files for the supported build images.

use anyhow::{Context, Result};

use crate::core::spec::ConfigError;
use crate::io::config::CheckFile;

const PROFILES: &[(&str, &str)] = &[
    (
        "rocky9",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/profiles/rocky9.toml")),
    ),
    (
        "ubuntu22.04",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/profiles/ubuntu22.04.toml"
        )),
    ),
];

/// Names of the built-in profiles, in display order.
pub fn names() -> impl Iterator<Item = &'static str> {
    PROFILES.iter().map(|(name, _)| *name)
}

/// Raw TOML of a built-in profile.
pub fn source(name: &str) -> Option<&'static str> {
    PROFILES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, contents)| *contents)
}

/// Parse and validate a built-in profile.
pub fn load(name: &str) -> Result<CheckFile> {
    let contents = source(name).ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
    CheckFile::parse_str(contents).with_context(|| format!("load profile {name}"))
}
