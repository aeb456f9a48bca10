//! Idle-driven code sandbox.
//!
//! Runs untrusted snippets and stored projects as isolated, time-bounded
//! child processes, keeps a reviewed project store fed by a pending queue,
//! and fires execution cycles in the background once the host goes idle.
//!
//! - **[`core`]**: Pure, deterministic logic (names, env scrubbing, artifact
//!   state machine, idle phases). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem stores, processes,
//!   config). Isolated behind small types and the
//!   [`io::interpreter::ScriptRunner`] seam.
//!
//! Orchestration modules ([`engine`], [`approval`], [`generator`],
//! [`scheduler`]) combine the two to implement the library API, the CLI and
//! the HTTP surface in `sandbox-ui`.

pub mod approval;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod generator;
pub mod io;
pub mod logging;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
