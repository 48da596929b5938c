//! Process exit codes.
//!
//! Scripts rely on these; changing a value is a breaking change.

/// Every item resolved without human review.
pub const SUCCESS: i32 = 0;

/// Escalations or incomplete items remain.
pub const UNRESOLVED: i32 = 1;

/// Bad input, bad configuration, or I/O failure.
pub const ERROR: i32 = 2;
