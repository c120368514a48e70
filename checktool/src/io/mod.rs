//! Side-effecting operations: processes, transports, files on disk.
//!
//! Everything that touches the target or the local filesystem lives here so
//! the engine can be driven by an in-memory backend in tests.

pub mod backend;
pub mod config;
pub mod process;
pub mod profiles;
pub mod report_writer;
pub mod retry;
pub mod shell;
pub mod target;
