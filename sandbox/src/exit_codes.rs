//! Stable exit codes for sandbox CLI commands.

/// Command succeeded; for runs, the code completed within its budget.
pub const OK: i32 = 0;
/// Invalid config or layout, or any unclassified error.
pub const INVALID: i32 = 1;
/// A named project or log record does not exist.
pub const NOT_FOUND: i32 = 2;
/// The request was rejected (malformed descriptor, unusable name, ...).
pub const BAD_REQUEST: i32 = 3;
/// A run finished with `ok = false` (timeout or launch failure).
pub const RUN_FAILED: i32 = 4;
