//! Worker WebSocket transport.
//!
//! Carries the JSON worker protocol between remote workers and the
//! coordinator's worker surface.

mod handler;

pub use handler::worker_ws_handler;
