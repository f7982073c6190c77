//! Stable exit codes for the optiloop CLI.

/// A final report was produced (or a non-run command succeeded).
pub const OK: i32 = 0;
/// Invalid input or configuration, or an internal error.
pub const INVALID: i32 = 1;
/// The user cancelled at the plan checkpoint.
pub const CANCELLED: i32 = 2;
/// A step halted on a model or tooling failure; the round state was kept.
pub const HALTED: i32 = 3;
/// The fix budget was spent without a successful sandbox run.
pub const GAVE_UP: i32 = 4;
