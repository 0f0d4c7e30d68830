//! Caseflow domain types shared by the coordinator, the API server and
//! workers.
//!
//! Nothing in this crate performs I/O. It defines the data model (cases,
//! execution contexts, runs, worker handles), the worker wire protocol, the
//! collaborator traits and the domain error type.

pub mod case;
pub mod collaborators;
pub mod context;
pub mod error;
pub mod link;
pub mod protocol;
pub mod repair;
pub mod run;
pub mod types;
pub mod worker;
