//! Data Transfer Objects for the controller API
//!
//! Request and response bodies exchanged between the controller, the client
//! library and the CLI.

pub mod monitor;
pub mod submission;
