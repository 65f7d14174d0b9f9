//! Shared error types, IDs, and observability primitives for CrossFlow crates.
//!
//! Architecture role:
//! - provides common [`CflError`] / [`Result`] contracts
//! - defines the typed ids passed between the graph model and the compiler
//! - hosts the stage-compiler metrics registry
//!
//! Key modules:
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod error;
pub mod ids;
pub mod metrics;

pub use error::{CflError, Result};
pub use ids::*;
pub use metrics::MetricsRegistry;
