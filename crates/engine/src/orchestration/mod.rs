//! Pre/post schedule orchestration.
//!
//! Everything that happens around a task's main loop: requirement
//! fulfillment, preparation and cleanup with retry, phase state tracking, and
//! the messages exchanged with the scheduler.

pub mod context;
pub mod fulfillment;
pub mod messages;
pub mod pre_post;
pub mod retry;
pub mod state;
