//! Repository Module
//!
//! Collaborator access for the controller.
//! Each repository wraps one external system behind a trait so services can
//! be exercised against fakes.

pub mod checkpoint;
pub mod compute;
pub mod object_store;

pub use checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore, PgCheckpointStore};
pub use compute::{ComputeConnector, ComputeError, ComputeService, HttpComputeConnector};
pub use object_store::{HttpObjectStore, ObjectPage, ObjectStore, StoreError};
