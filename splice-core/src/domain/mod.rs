//! Core domain types
//!
//! This module contains the core domain structures used across Splice crates.
//! These types are shared between the engine (which executes actions), the
//! runner (which pulls jobs from the remote queue) and the CLI (which runs
//! actions locally).

pub mod action;
pub mod job;
pub mod log;
pub mod patch;
pub mod repository;
