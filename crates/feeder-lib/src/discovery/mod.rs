//! Dynamic service discovery from agent registrations
//!
//! Agents register into the [`Registry`]; the [`Reconciler`] periodically
//! turns the registry into target groups and emits the full discovery
//! state, with tombstones for sources that disappeared.

mod builder;
mod r#loop;
mod registry;


pub use builder::{build, BuildError};
pub use r#loop::{
    CycleError, CycleReport, Reconciler, ReconcilerBuilder, ReconcilerConfig, ReconcilerState,
};
pub use registry::{
    fields, validate, RegisterError, Registry, RegistryUnavailable, ValidationError,
};
