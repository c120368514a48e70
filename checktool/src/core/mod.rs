//! Deterministic, pure logic shared by the checktool engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod judge;
pub mod report;
pub mod spec;
pub mod types;
