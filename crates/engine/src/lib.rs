//! Taskloom Engine library.
//!
//! Runs schedule entries: evaluates their condition trees, drives each run
//! through its pre-schedule, main and post-schedule phases, and persists the
//! schedule.
//!
//! ## Structure
//!
//! - `scheduler/` - The condition-driven loop and its operator handle
//! - `task/` - The task trait and the per-task runner
//! - `orchestration/` - Pre/post phases, requirement fulfillment, retry
//! - `infrastructure/` - Ports, adapters, settings, schedule persistence

pub mod infrastructure;
pub mod orchestration;
pub mod scheduler;
pub mod task;

pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle};
