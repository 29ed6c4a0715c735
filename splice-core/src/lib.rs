//! Splice Core
//!
//! Core types and abstractions for the Splice action execution engine.
//!
//! This crate contains:
//! - Domain types: Core entities (Action, Step, Job, Patch, etc.)
//! - DTOs: Data transfer objects for runner <-> queue communication

pub mod domain;
pub mod dto;
