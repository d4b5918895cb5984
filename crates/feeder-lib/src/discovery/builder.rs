//! Translation of a registration into a target group

use crate::models::{
    AgentRegistration, TargetGroup, ADDRESS_LABEL, DEFAULT_METRICS_PATH, META_LABEL_PREFIX,
    METRICS_PATH_LABEL,
};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("registration for `{app}` has no targets")]
    NoTargets { app: String },
    #[error("invalid target address {target:?}")]
    InvalidAddress { target: String },
}

/// Build the target group advertised for a registration
///
/// The source is `host:port` of the first target, with the metrics path
/// appended when it differs from the default. Identical registrations
/// always yield the same source.
pub fn build(entry: &AgentRegistration) -> Result<TargetGroup, BuildError> {
    let first = entry.targets.first().ok_or_else(|| BuildError::NoTargets {
        app: entry.labels.app.clone(),
    })?;

    let metrics_path = entry
        .labels
        .metrics_path
        .as_deref()
        .filter(|path| !path.is_empty())
        .unwrap_or(DEFAULT_METRICS_PATH);

    let mut source = source_address(first)?;
    if metrics_path != DEFAULT_METRICS_PATH {
        source.push_str(metrics_path);
    }

    let mut labels = BTreeMap::new();
    labels.insert(meta_label("app"), entry.labels.app.clone());
    if let Some(instance_name) = entry.instance_name() {
        labels.insert(meta_label("instance_name"), instance_name.to_string());
    }
    labels.insert(meta_label("metrics_path"), metrics_path.to_string());
    labels.insert(METRICS_PATH_LABEL.to_string(), metrics_path.to_string());

    let targets = entry
        .targets
        .iter()
        .map(|address| BTreeMap::from([(ADDRESS_LABEL.to_string(), address.clone())]))
        .collect();

    Ok(TargetGroup {
        source,
        labels,
        targets,
    })
}

fn meta_label(name: &str) -> String {
    format!("{META_LABEL_PREFIX}{name}")
}

/// Normalize a target address to `host:port`, or `host` when it has no port
fn source_address(target: &str) -> Result<String, BuildError> {
    let invalid = || BuildError::InvalidAddress {
        target: target.to_string(),
    };

    let target = target.trim();
    if target.is_empty() {
        return Err(invalid());
    }

    match target.rsplit_once(':') {
        // Bracketed IPv6 without a port, e.g. `[::1]`
        Some((_, port)) if port.ends_with(']') => Ok(target.to_string()),
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| invalid())?;
            if host.is_empty() {
                return Err(invalid());
            }
            Ok(format!("{host}:{port}"))
        }
        None => Ok(target.to_string()),
    }
}
