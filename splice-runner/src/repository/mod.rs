//! Repository layer
//!
//! Repositories abstract communication with the remote job queue. They
//! provide a small, focused interface without any business logic so the
//! scheduler can be tested against an in-memory queue.

mod jobs;

pub use jobs::{JobRepository, QueueJobRepository};
