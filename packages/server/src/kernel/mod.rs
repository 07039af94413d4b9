//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod memory;

// Re-export the composition root and storage types
pub use deps::{build_pipeline, build_pipeline_with, request_actor, PipelineConfig, ServerDeps};
pub use memory::{JournalEvent, MemoryDb, MemoryUnitOfWork, MemoryUnitOfWorkFactory};
