//! Observability infrastructure for the discovery feeder
//!
//! Provides:
//! - Prometheus metrics (registrations, reconciliation cycles, file writes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for reconciliation cycle latency (in seconds)
const CYCLE_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<FeederMetricsInner> = OnceLock::new();

struct FeederMetricsInner {
    registrations: IntCounter,
    registration_rejections: IntCounter,
    registered_agents: IntGauge,
    cycle_duration_seconds: Histogram,
    cycles: IntCounter,
    cycle_errors: IntCounter,
    build_errors: IntCounter,
    duplicate_sources: IntCounter,
    live_target_groups: IntGauge,
    tombstones_emitted: IntCounter,
    file_writes: IntCounter,
    file_write_errors: IntCounter,
}

impl FeederMetricsInner {
    fn new() -> Self {
        Self {
            registrations: register_int_counter!(
                "sd_feeder_registrations_total",
                "Total number of accepted agent registrations"
            )
            .expect("Failed to register registrations_total"),

            registration_rejections: register_int_counter!(
                "sd_feeder_registration_rejections_total",
                "Total number of registrations rejected by validation"
            )
            .expect("Failed to register registration_rejections_total"),

            registered_agents: register_int_gauge!(
                "sd_feeder_registered_agents",
                "Number of agents currently held in the registry"
            )
            .expect("Failed to register registered_agents"),

            cycle_duration_seconds: register_histogram!(
                "sd_feeder_cycle_duration_seconds",
                "Time spent building and diffing target groups in one cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles: register_int_counter!(
                "sd_feeder_cycles_total",
                "Total number of completed reconciliation cycles"
            )
            .expect("Failed to register cycles_total"),

            cycle_errors: register_int_counter!(
                "sd_feeder_cycle_errors_total",
                "Total number of reconciliation cycles skipped after a registry read failure"
            )
            .expect("Failed to register cycle_errors_total"),

            build_errors: register_int_counter!(
                "sd_feeder_build_errors_total",
                "Total number of registrations that could not be turned into a target group"
            )
            .expect("Failed to register build_errors_total"),

            duplicate_sources: register_int_counter!(
                "sd_feeder_duplicate_sources_total",
                "Total number of registrations skipped because another one claimed their source"
            )
            .expect("Failed to register duplicate_sources_total"),

            live_target_groups: register_int_gauge!(
                "sd_feeder_live_target_groups",
                "Number of live target groups emitted by the last cycle"
            )
            .expect("Failed to register live_target_groups"),

            tombstones_emitted: register_int_counter!(
                "sd_feeder_tombstones_emitted_total",
                "Total number of removal markers emitted for vanished sources"
            )
            .expect("Failed to register tombstones_emitted_total"),

            file_writes: register_int_counter!(
                "sd_feeder_file_writes_total",
                "Total number of discovery file writes"
            )
            .expect("Failed to register file_writes_total"),

            file_write_errors: register_int_counter!(
                "sd_feeder_file_write_errors_total",
                "Total number of failed discovery file writes"
            )
            .expect("Failed to register file_write_errors_total"),
        }
    }
}

/// Feeder metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct FeederMetrics {
    _private: (),
}

impl Default for FeederMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FeederMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(FeederMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &FeederMetricsInner {
        GLOBAL_METRICS.get_or_init(FeederMetricsInner::new)
    }

    pub fn inc_registrations(&self) {
        self.inner().registrations.inc();
    }

    pub fn inc_registration_rejections(&self) {
        self.inner().registration_rejections.inc();
    }

    pub fn set_registered_agents(&self, count: usize) {
        self.inner().registered_agents.set(count as i64);
    }

    /// Record a completed cycle
    pub fn observe_cycle(&self, elapsed: Duration, live_groups: usize, tombstones: usize) {
        let inner = self.inner();
        inner.cycle_duration_seconds.observe(elapsed.as_secs_f64());
        inner.cycles.inc();
        inner.live_target_groups.set(live_groups as i64);
        inner.tombstones_emitted.inc_by(tombstones as u64);
    }

    pub fn inc_cycle_errors(&self) {
        self.inner().cycle_errors.inc();
    }

    pub fn inc_build_errors(&self) {
        self.inner().build_errors.inc();
    }

    pub fn inc_duplicate_sources(&self) {
        self.inner().duplicate_sources.inc();
    }

    pub fn inc_file_writes(&self) {
        self.inner().file_writes.inc();
    }

    pub fn inc_file_write_errors(&self) {
        self.inner().file_write_errors.inc();
    }
}

/// Structured logger for feeder lifecycle and registration events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, refresh_interval: Duration, sd_file: &str) {
        info!(
            event = "feeder_started",
            node = %self.node_name,
            feeder_version = %version,
            refresh_interval_secs = refresh_interval.as_secs(),
            sd_file = %sd_file,
            "Discovery feeder started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "feeder_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Discovery feeder shutting down"
        );
    }

    pub fn log_registration(&self, key: &str, targets: usize, replaced: bool) {
        info!(
            event = "agent_registered",
            node = %self.node_name,
            key = %key,
            targets = targets,
            replaced = replaced,
            "Agent registered"
        );
    }

    pub fn log_rejection(&self, field: &str, reason: &str) {
        warn!(
            event = "agent_rejected",
            node = %self.node_name,
            field = %field,
            reason = %reason,
            "Agent registration rejected"
        );
    }

    pub fn log_deregistration(&self, key: &str) {
        info!(
            event = "agent_deregistered",
            node = %self.node_name,
            key = %key,
            "Agent deregistered"
        );
    }
}
