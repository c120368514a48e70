//! Declarative host-state verification.
//!
//! A check file (or built-in profile) lists assertions about a target host:
//! installed packages, users and groups, file presence, modes and contents,
//! command output. `checktool` evaluates them concurrently through a
//! [`io::backend::HostBackend`] and reports which held.
//!
//! - **[`core`]**: Pure logic (spec parsing, predicate judgement, summaries).
//! - **[`io`]**: Transports, processes, config and report files.
//! - **[`engine`]**: The bounded worker pool that evaluates assertions.
//!
//! [`run`] and [`cli`] wire these together for the binary.

pub mod cli;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
