//! Discovery file writer
//!
//! Consumes the lists emitted by the reconciler and maintains a file-based
//! service discovery file:
//! - groups with targets replace the entry for their source
//! - tombstones remove the entry for their source
//! - the file is rewritten atomically, and only when its content changes

use crate::health::{components, HealthRegistry};
use crate::models::TargetGroup;
use crate::observability::FeederMetrics;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One entry of the file-SD JSON array
#[derive(Debug, Serialize)]
struct FileSdEntry<'a> {
    targets: Vec<&'a str>,
    labels: &'a BTreeMap<String, String>,
}

pub struct FileSdWriter {
    path: PathBuf,
    /// Current groups by source
    groups: BTreeMap<String, TargetGroup>,
    /// Content of the last successful write
    last_written: Option<Vec<u8>>,
    metrics: FeederMetrics,
    health: Option<HealthRegistry>,
}

impl FileSdWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            groups: BTreeMap::new(),
            last_written: None,
            metrics: FeederMetrics::new(),
            health: None,
        }
    }

    /// Report write outcomes to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge one emitted list into the current state
    pub fn apply(&mut self, update: Vec<TargetGroup>) {
        for group in update {
            if group.targets.is_empty() {
                self.groups.remove(&group.source);
            } else {
                self.groups.insert(group.source.clone(), group);
            }
        }
    }

    /// Render the current state as a file-SD JSON document, sorted by source
    pub fn render(&self) -> Result<Vec<u8>> {
        let entries: Vec<FileSdEntry<'_>> = self
            .groups
            .values()
            .map(|group| FileSdEntry {
                targets: group.addresses().collect(),
                labels: &group.labels,
            })
            .collect();

        let mut contents =
            serde_json::to_vec_pretty(&entries).context("Failed to encode target groups")?;
        contents.push(b'\n');
        Ok(contents)
    }

    /// Write the file if the rendered content differs from the last write.
    /// Returns whether a write happened.
    pub fn write_if_changed(&mut self) -> Result<bool> {
        let contents = self.render()?;
        if self.last_written.as_ref() == Some(&contents) {
            return Ok(false);
        }

        write_atomic(&self.path, &contents)?;
        self.last_written = Some(contents);
        Ok(true)
    }

    /// Apply emitted lists until the channel closes
    pub async fn run(mut self, mut groups_rx: mpsc::Receiver<Vec<TargetGroup>>) {
        info!(path = %self.path.display(), "Starting discovery file writer");

        while let Some(update) = groups_rx.recv().await {
            self.apply(update);

            match self.write_if_changed() {
                Ok(written) => {
                    if written {
                        self.metrics.inc_file_writes();
                        debug!(
                            path = %self.path.display(),
                            groups = self.groups.len(),
                            "Wrote discovery file"
                        );
                    }
                    if let Some(health) = &self.health {
                        health.set_healthy(components::FILE_SD_WRITER).await;
                    }
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    self.metrics.inc_file_write_errors();
                    warn!(
                        path = %self.path.display(),
                        error = %error,
                        "Failed to write discovery file"
                    );
                    if let Some(health) = &self.health {
                        health
                            .set_unhealthy(components::FILE_SD_WRITER, error)
                            .await;
                    }
                }
            }
        }

        info!("Emission channel closed, stopping discovery file writer");
    }
}

/// Replace `path` with `contents` through a temporary file in the same directory
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(contents)
        .context("Failed to write temporary discovery file")?;
    file.as_file()
        .sync_all()
        .context("Failed to sync temporary discovery file")?;
    file.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::build;
    use crate::models::AgentRegistration;
    use tempfile::TempDir;

    fn group(app: &str, target: &str) -> TargetGroup {
        build(&AgentRegistration::new(app, vec![target.to_string()])).unwrap()
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_apply_tombstone_removes_source() {
        let mut writer = FileSdWriter::new("unused.json");
        writer.apply(vec![group("svc-a", "10.0.0.1:9100"), group("svc-b", "10.0.0.2:9100")]);
        assert_eq!(writer.groups.len(), 2);

        writer.apply(vec![
            group("svc-b", "10.0.0.2:9100"),
            TargetGroup::tombstone("10.0.0.1:9100"),
        ]);
        assert_eq!(writer.groups.len(), 1);
        assert!(writer.groups.contains_key("10.0.0.2:9100"));
    }

    #[test]
    fn test_render_file_sd_format() {
        let mut writer = FileSdWriter::new("unused.json");
        writer.apply(vec![group("svc-b", "10.0.0.2:9100"), group("svc-a", "10.0.0.1:9100")]);

        let rendered: serde_json::Value = serde_json::from_slice(&writer.render().unwrap()).unwrap();
        let expected = serde_json::json!([
            {
                "targets": ["10.0.0.1:9100"],
                "labels": {
                    "__meta_app": "svc-a",
                    "__meta_metrics_path": "/metrics",
                    "__metrics_path__": "/metrics"
                }
            },
            {
                "targets": ["10.0.0.2:9100"],
                "labels": {
                    "__meta_app": "svc-b",
                    "__meta_metrics_path": "/metrics",
                    "__metrics_path__": "/metrics"
                }
            }
        ]);
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_write_only_when_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("targets.json");
        let mut writer = FileSdWriter::new(&path);

        // Empty state still produces a file
        assert!(writer.write_if_changed().unwrap());
        assert_eq!(read_json(&path), serde_json::json!([]));

        writer.apply(vec![group("svc-a", "10.0.0.1:9100")]);
        assert!(writer.write_if_changed().unwrap());
        assert!(!writer.write_if_changed().unwrap());

        writer.apply(vec![group("svc-a", "10.0.0.1:9100")]);
        assert!(!writer.write_if_changed().unwrap());

        assert_eq!(read_json(&path)[0]["targets"][0], "10.0.0.1:9100");
        // No temporary files left behind
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_write_is_retried() {
        let dir = TempDir::new().unwrap();
        // A directory in place of the file makes persist fail
        let path = dir.path().join("targets.json");
        std::fs::create_dir(&path).unwrap();

        let mut writer = FileSdWriter::new(&path);
        writer.apply(vec![group("svc-a", "10.0.0.1:9100")]);
        assert!(writer.write_if_changed().is_err());
        assert!(writer.last_written.is_none());

        std::fs::remove_dir(&path).unwrap();
        assert!(writer.write_if_changed().unwrap());
        assert_eq!(read_json(&path)[0]["labels"]["__meta_app"], "svc-a");
    }

    #[tokio::test]
    async fn test_run_until_channel_closes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("targets.json");
        let health = HealthRegistry::new();
        let writer = FileSdWriter::new(&path).with_health(health.clone());

        let (tx, rx) = mpsc::channel(4);
        tx.send(vec![group("svc-a", "10.0.0.1:9100")]).await.unwrap();
        tx.send(vec![TargetGroup::tombstone("10.0.0.1:9100")]).await.unwrap();
        drop(tx);

        writer.run(rx).await;

        assert_eq!(read_json(&path), serde_json::json!([]));
        assert_eq!(
            health.health().await.components[components::FILE_SD_WRITER].status,
            crate::health::ComponentStatus::Healthy
        );
    }
}
