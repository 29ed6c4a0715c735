//! Scheduler layer for the runner
//!
//! This layer handles pulling jobs from the queue and coordinating their
//! execution across the runner's worker slots. It manages the lifecycle of
//! jobs from acceptance to the terminal report.

pub mod lifecycle;
pub mod poller;

pub use lifecycle::JobLifecycle;
pub use poller::JobPoller;

#[cfg(test)]
pub(crate) mod testing;
