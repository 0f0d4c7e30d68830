//! External delivery channels for run output.

pub mod webhook;
