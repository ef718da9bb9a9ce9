//! Scheduler layer for the controller
//!
//! Wakes persisted monitor instances when their timer is due, runs one
//! activation each and stores the outcome. Everything a monitor needs to
//! resume lives in the checkpoint store, so a restarted controller picks up
//! where the previous one stopped.

pub mod poller;

pub use poller::{MonitorScheduler, SchedulerOptions};
