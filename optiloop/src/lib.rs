//! LLM-driven optimization loop.
//!
//! A submission (a natural-language optimization problem plus optional
//! attachments) is driven through analysis, code generation, containerized
//! execution, output review, and repeated improvement rounds until the user
//! asks for a final comparative report. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (round state, routing table,
//!   structured parsing, report resolution). No I/O.
//! - **[`io`]**: Side effects (model and sandbox processes, workspace files,
//!   configuration, the user channel), each behind a trait where tests need
//!   a double.
//!
//! [`steps`] implement one pipeline stage each; [`controller`] sequences them
//! and [`submit`] prepares a session for it.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod steps;
pub mod submit;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
