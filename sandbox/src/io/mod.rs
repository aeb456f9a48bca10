//! I/O helpers for the sandbox: filesystem layout, processes, stores.

pub mod atomic;
pub mod config;
pub mod ids;
pub mod init;
pub mod interpreter;
pub mod pending;
pub mod process;
pub mod project_store;
pub mod run_log;
pub mod schema;
pub mod scratch;
