//! The caseflow coordinator: dispatch queue, run-status tracker, repair path
//! and worker registry, wired together by [`Coordinator`].
//!
//! The crate is transport-agnostic. HTTP and WebSocket surfaces live in
//! `caseflow-api`; [`local::LocalLink`] drives the worker surface in-process.

pub mod background;
pub mod config;
pub mod connector;
pub mod dispatch;
pub mod local;
pub mod registry;
pub mod repair;
pub mod service;
pub mod store;
pub mod tracker;

pub use config::CoordinatorConfig;
pub use connector::{ConnectorRegistry, RunOwner, WebhookConnector};
pub use service::{Coordinator, RunSource};
pub use store::InMemoryConfigurationStore;
