//! Stable exit codes for checktool CLI commands.

/// Every assertion passed (or `validate`/`list`/`profiles` succeeded).
pub const OK: i32 = 0;
/// At least one assertion failed, timed out, or hit an unavailable backend.
pub const FAILED: i32 = 1;
/// Setup failed before any assertion ran (bad config, target unreachable).
pub const SETUP: i32 = 2;
