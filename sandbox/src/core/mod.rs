//! Deterministic, pure logic shared by the sandbox.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod artifact;
pub mod env;
pub mod idle;
pub mod names;
pub mod text;
pub mod types;
