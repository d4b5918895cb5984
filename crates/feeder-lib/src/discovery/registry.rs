//! Registry of agents that announced themselves as scrape targets
//!
//! Registrations are validated before they are stored. The underlying map
//! sits behind a single lock held only for an insert, a removal or a full
//! copy, so reconciliation always works on a detached snapshot.

use crate::models::{AgentRegistration, RegistrationKey};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

/// Field names reported by validation errors
pub mod fields {
    pub const TARGETS: &str = "targets";
    pub const APP: &str = "labels.app";
}

/// A registration that was rejected before reaching the registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("`{field}` is required")]
    MissingField { field: &'static str },
    #[error("`targets` contains an invalid entry {target:?}")]
    InvalidTarget { target: String },
}

impl ValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField { field } => field,
            ValidationError::InvalidTarget { .. } => fields::TARGETS,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("registry is unavailable")]
    Unavailable,
}

/// The registry lock was poisoned by a panicking writer
#[derive(Debug, Error)]
#[error("registry lock poisoned")]
pub struct RegistryUnavailable;

/// Check the required fields of a registration
pub fn validate(entry: &AgentRegistration) -> Result<(), ValidationError> {
    if entry.targets.is_empty() {
        return Err(ValidationError::MissingField {
            field: fields::TARGETS,
        });
    }
    if let Some(target) = entry.targets.iter().find(|t| t.trim().is_empty()) {
        return Err(ValidationError::InvalidTarget {
            target: target.clone(),
        });
    }
    if entry.labels.app.trim().is_empty() {
        return Err(ValidationError::MissingField { field: fields::APP });
    }
    Ok(())
}

/// In-memory set of registered agents keyed by app and instance name
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<BTreeMap<RegistrationKey, AgentRegistration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a registration, replacing any entry with the
    /// same key. Returns whether an existing entry was replaced.
    pub fn register(&self, entry: AgentRegistration) -> Result<bool, RegisterError> {
        validate(&entry)?;

        let key = entry.key();
        let mut entries = self.lock().map_err(|_| RegisterError::Unavailable)?;
        let replaced = entries.insert(key.clone(), entry).is_some();
        debug!(key = %key, replaced, "Registered agent");

        Ok(replaced)
    }

    /// Remove a registration
    pub fn deregister(
        &self,
        key: &RegistrationKey,
    ) -> Result<Option<AgentRegistration>, RegistryUnavailable> {
        let mut entries = self.lock()?;
        let removed = entries.remove(key);
        if removed.is_some() {
            debug!(key = %key, "Deregistered agent");
        }
        Ok(removed)
    }

    /// Point-in-time copy of all registrations, in key order
    pub fn snapshot(&self) -> Result<Vec<AgentRegistration>, RegistryUnavailable> {
        Ok(self.lock()?.values().cloned().collect())
    }

    pub fn len(&self) -> Result<usize, RegistryUnavailable> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryUnavailable> {
        Ok(self.lock()?.is_empty())
    }

    /// Acquire the map. The call that observes a poisoned lock fails and
    /// clears the poison, so the next caller proceeds. Every mutation is a
    /// single `insert` or `remove`, which leaves the map consistent even
    /// when the holder panicked.
    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<RegistrationKey, AgentRegistration>>, RegistryUnavailable>
    {
        self.entries.lock().map_err(|_| {
            warn!("Registry lock poisoned, failing this access and clearing the poison");
            self.entries.clear_poison();
            RegistryUnavailable
        })
    }

    /// Poison the lock by panicking while holding it
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.entries.lock();
            panic!("poisoning registry");
        }));
    }
}
