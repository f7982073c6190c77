//! Deterministic, pure logic shared by the controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod excerpt;
pub mod report;
pub mod routing;
pub mod state;
pub mod structured;
pub mod types;
