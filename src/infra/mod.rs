//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod fs_store;
pub mod http;
pub mod memory_store;
pub mod telemetry;
