//! Sluice Core
//!
//! Core types shared by the Sluice batch controller, its client and the CLI.
//!
//! This crate contains:
//! - Domain types: work items, task specifications, pool/job descriptors,
//!   monitor checkpoints
//! - DTOs: request and response bodies exchanged with the controller API

pub mod domain;
pub mod dto;
