//! Splice execution engine
//!
//! Runs declarative actions against repository snapshots and captures the
//! result as a patch. It includes:
//! - Snapshot Manager: archive fetch and pristine/working tree staging
//! - Step Executor: command and container steps with persistent caches
//! - Diff Computer: path-independent unified diffs
//! - Result Cache: content-addressed patch storage
//! - `Engine`: the end-to-end entry point used by the runner and the CLI

pub mod cache;
pub mod cancel;
pub mod container;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
mod process;
pub mod sink;
pub mod snapshot;

pub use cache::{CacheKey, DiskCache, NoopCache, ResultCache, default_cache_dir};
pub use cancel::Cancellation;
pub use container::{CliRuntime, ContainerRuntime, ContainerSpec, OWNER_LABEL};
pub use diff::{DiffStat, DiffTool};
pub use engine::{Engine, ExecRequest, Execution, NoopObserver, PhaseObserver, validate};
pub use error::{ActionRunError, EngineError, Result};
pub use executor::StepExecutor;
pub use sink::{LogSink, MemorySink, NullSink};
pub use snapshot::{ArchiveFormat, ArchiveSource, ExecutionContext, Stager};
