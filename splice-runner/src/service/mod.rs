//! Service layer
//!
//! Services contain business logic for the runner. They orchestrate
//! operations using repositories and implement core functionality like
//! job execution, log buffering, and orphan container reclamation.
//!
//! All services are trait-based to enable testing and dependency injection.

mod execution;
mod log_buffer;
mod reclaim;

// Re-export traits
pub use execution::ExecutionService;
pub use log_buffer::LogBufferService;

// Re-export implementations
pub use execution::StandardExecutionService;
pub use log_buffer::InMemoryLogBuffer;
pub use reclaim::reclaim_orphans;
