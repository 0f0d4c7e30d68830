//! Caseflow worker: pulls test cases from the coordinator, executes them and
//! reports the outcome.
//!
//! - [`execution::WorkerLoop`] drives one connection.
//! - [`pool::WorkerPool`] runs several loops, reconnecting failed links.
//! - [`client::WsLink`] is the WebSocket transport.
//! - [`command::CommandExecutor`] runs a case's shell command.

pub mod backoff;
pub mod client;
pub mod command;
pub mod config;
pub mod execution;
pub mod pool;
