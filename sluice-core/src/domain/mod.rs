//! Core domain types
//!
//! These types describe a batch submission end to end: the signed inputs
//! discovered in object storage, the tasks planned from them, the pool and job
//! that run them, and the checkpoint that lets a monitor resume after a restart.

pub mod application;
pub mod job;
pub mod monitor;
pub mod pool;
pub mod settings;
pub mod signing;
pub mod task;
pub mod work_item;
