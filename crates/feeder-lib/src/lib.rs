//! Library for the file-based service discovery feeder
//!
//! This crate provides the core functionality for:
//! - Registering agents as scrape targets
//! - Periodic reconciliation of registrations into target groups
//! - Writing the discovery file consumed by the metrics collector
//! - Health checks and observability

pub mod discovery;
pub mod file_sd;
pub mod health;
pub mod models;
pub mod observability;

pub use discovery::{Reconciler, ReconcilerBuilder, Registry};
pub use file_sd::FileSdWriter;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{FeederMetrics, StructuredLogger};
