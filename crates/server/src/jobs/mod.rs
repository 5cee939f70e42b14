//! Job lifecycle: store, controller, expiry.

pub mod controller;
pub mod reaper;
pub mod store;

pub use controller::{ControllerSettings, JobController};
pub use reaper::ExpiryReaper;
pub use store::{JobHandle, JobStore};
