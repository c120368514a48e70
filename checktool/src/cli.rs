//! CLI command implementations.

use anyhow::Result;
use tracing::debug;

use crate::io::profiles;
use crate::io::report_writer::JsonDestination;
use crate::io::target::Target;
use crate::run::{CheckSource, Overrides, emit, load_checks, run};

/// Evaluate every check and print the report. Returns the process exit code.
pub fn run_target(
    source: &CheckSource,
    target: &Target,
    overrides: &Overrides,
    json: Option<&JsonDestination>,
) -> Result<i32> {
    let file = load_checks(source, overrides)?;
    debug!(checks = file.checks.len(), target = %target, "checks loaded");
    let outcome = run(&file, target)?;
    let label = target.to_string();
    emit(&outcome, &label, json);
    Ok(outcome.exit_code())
}

/// Parse and validate the checks without touching any target.
pub fn validate(source: &CheckSource) -> Result<()> {
    let file = load_checks(source, &Overrides::default())?;
    println!("ok: {} checks", file.checks.len());
    Ok(())
}

/// Print one line per check: index, kind and subject.
pub fn list(source: &CheckSource) -> Result<()> {
    let file = load_checks(source, &Overrides::default())?;
    for (index, spec) in file.checks.iter().enumerate() {
        println!("{index} {} {}", spec.kind(), spec.target());
    }
    Ok(())
}

/// Print the names of the built-in profiles.
pub fn list_profiles() {
    for name in profiles::names() {
        println!("{name}");
    }
}
