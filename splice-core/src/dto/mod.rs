//! Data Transfer Objects for runner <-> queue communication
//!
//! This module contains the request/response bodies exchanged between the
//! runner and the remote job queue. Domain entities are reused directly where
//! they already have the right wire shape (e.g. `Job`).

pub mod job;
pub mod log;
