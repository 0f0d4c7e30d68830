//! Caseflow run event bus and reporting.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`RunEvent`] — the lifecycle event envelope for runs and cases.
//! - [`RunReporter`] — background service that renders terminal runs.
//! - [`delivery`] — external delivery channels (webhook).

pub mod bus;
pub mod delivery;
pub mod reporter;

pub use bus::{EventBus, RunEvent};
pub use delivery::webhook::WebhookDelivery;
pub use reporter::RunReporter;
