//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod job_store;
pub mod telemetry;
