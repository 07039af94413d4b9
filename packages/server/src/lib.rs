// Tenant Administration - API Core
//
// This crate provides the request-processing backend for tenant and
// membership administration. Architecture follows domain-driven design:
// aggregates guard their own rules, handlers stay thin, and the conveyor
// pipeline wraps every request in validation, tracing, and transactions.
//
// Requests are organized per-domain in domains/*/commands.rs and queries.rs

pub mod common;
pub mod domains;
pub mod kernel;

pub use kernel::{build_pipeline, build_pipeline_with, PipelineConfig, ServerDeps};
