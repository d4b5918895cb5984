//! Reconciliation loop
//!
//! On every tick the loop snapshots the registry, builds one target group
//! per registration and appends a tombstone for each source that was
//! advertised in the previous cycle but is gone now. The combined list is
//! sent on the emission channel as a single unit.

use super::builder::build;
use super::registry::{Registry, RegistryUnavailable};
use crate::health::{components, HealthRegistry};
use crate::models::TargetGroup;
use crate::observability::FeederMetrics;
use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between cycles (default: 30 seconds)
    pub refresh_interval: Duration,
    /// Number of emitted lists the channel buffers before a cycle waits
    pub channel_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            channel_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    /// Waiting for the next tick or for shutdown
    Idle,
    /// Executing a cycle; shutdown is not observed until it completes
    Reconciling,
    /// Shutdown observed, no further cycles
    Terminal,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("registry snapshot failed: {0}")]
    RegistryUnavailable(#[from] RegistryUnavailable),
}

/// Outcome of one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Live groups followed by tombstones
    pub groups: Vec<TargetGroup>,
    pub live: usize,
    pub tombstones: usize,
    pub build_errors: usize,
    /// Registrations skipped because an earlier one claimed their source
    pub duplicates: usize,
}

pub struct Reconciler {
    registry: Arc<Registry>,
    config: ReconcilerConfig,
    groups_tx: mpsc::Sender<Vec<TargetGroup>>,
    /// Sources emitted as live groups by the previous successful cycle
    known_sources: BTreeSet<String>,
    state_tx: watch::Sender<ReconcilerState>,
    metrics: FeederMetrics,
    health: Option<HealthRegistry>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<Registry>,
        config: ReconcilerConfig,
    ) -> (Self, mpsc::Receiver<Vec<TargetGroup>>) {
        let (groups_tx, groups_rx) = mpsc::channel(config.channel_capacity);

        let reconciler = Self {
            registry,
            config,
            groups_tx,
            known_sources: BTreeSet::new(),
            state_tx: watch::channel(ReconcilerState::Idle).0,
            metrics: FeederMetrics::new(),
            health: None,
        };

        (reconciler, groups_rx)
    }

    /// Report cycle outcomes to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn state(&self) -> ReconcilerState {
        *self.state_tx.borrow()
    }

    /// Follow state transitions, including after the loop is spawned
    pub fn subscribe_state(&self) -> watch::Receiver<ReconcilerState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ReconcilerState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn known_sources(&self) -> &BTreeSet<String> {
        &self.known_sources
    }

    /// Run cycles until `shutdown` fires or its sender is dropped
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            refresh_interval_secs = self.config.refresh_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let mut ticker = interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.set_state(ReconcilerState::Idle);

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.set_state(ReconcilerState::Reconciling);
                    self.run_cycle().await;
                }
            }
        }

        self.set_state(ReconcilerState::Terminal);
    }

    /// Reconcile once and emit the result
    async fn run_cycle(&mut self) {
        let start = Instant::now();

        match self.reconcile() {
            Ok(report) => {
                let elapsed = start.elapsed();
                self.metrics
                    .observe_cycle(elapsed, report.live, report.tombstones);
                debug!(
                    live = report.live,
                    tombstones = report.tombstones,
                    build_errors = report.build_errors,
                    duplicates = report.duplicates,
                    elapsed_ms = elapsed.as_millis(),
                    "Reconciliation cycle complete"
                );

                if let Err(e) = self.groups_tx.send(report.groups).await {
                    warn!(error = %e, "Failed to emit target groups, receiver closed");
                }
                if let Some(health) = &self.health {
                    health.set_healthy(components::RECONCILER).await;
                }
            }
            Err(e) => {
                self.metrics.inc_cycle_errors();
                warn!(error = %e, "Skipping reconciliation cycle");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::RECONCILER, e.to_string())
                        .await;
                }
            }
        }
    }

    /// Build the full list for one cycle and advance the known sources
    ///
    /// A failed snapshot leaves the known sources untouched, so the next
    /// successful cycle diffs against the last list that was emitted.
    /// Each source appears at most once; the first registration in
    /// snapshot order keeps it.
    pub fn reconcile(&mut self) -> Result<CycleReport, CycleError> {
        let snapshot = self.registry.snapshot()?;

        let mut groups = Vec::with_capacity(snapshot.len());
        let mut current_sources = BTreeSet::new();
        let mut build_errors = 0;
        let mut duplicates = 0;
        for entry in &snapshot {
            match build(entry) {
                Ok(group) if current_sources.insert(group.source.clone()) => groups.push(group),
                Ok(group) => {
                    duplicates += 1;
                    self.metrics.inc_duplicate_sources();
                    warn!(
                        key = %entry.key(),
                        source = %group.source,
                        "Source already claimed by another registration, skipping agent"
                    );
                }
                Err(e) => {
                    build_errors += 1;
                    self.metrics.inc_build_errors();
                    warn!(
                        app = %entry.labels.app,
                        instance_name = entry.instance_name().unwrap_or_default(),
                        error = %e,
                        "Failed to build target group, skipping agent"
                    );
                }
            }
        }

        let live = groups.len();

        groups.extend(
            self.known_sources
                .difference(&current_sources)
                .map(TargetGroup::tombstone),
        );
        let tombstones = groups.len() - live;

        self.known_sources = current_sources;

        Ok(CycleReport {
            groups,
            live,
            tombstones,
            build_errors,
            duplicates,
        })
    }
}

/// Builder for creating the reconciliation loop
pub struct ReconcilerBuilder {
    registry: Option<Arc<Registry>>,
    health: Option<HealthRegistry>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            health: None,
            config: ReconcilerConfig::default(),
        }
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.config.refresh_interval = interval;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<(Reconciler, mpsc::Receiver<Vec<TargetGroup>>)> {
        let Some(registry) = self.registry else {
            bail!("Registry is required");
        };
        if self.config.refresh_interval.is_zero() {
            bail!("Refresh interval must be greater than zero");
        }
        if self.config.channel_capacity == 0 {
            bail!("Channel capacity must be greater than zero");
        }

        let (mut reconciler, groups_rx) = Reconciler::new(registry, self.config);
        reconciler.health = self.health;
        Ok((reconciler, groups_rx))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
