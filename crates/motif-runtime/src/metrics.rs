//! Prometheus metrics for scan passes over the event log

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;

/// Metrics collection for collection and counting passes
#[derive(Clone)]
pub struct RuntimeMetrics {
    registry: Arc<Registry>,
    pub events_scanned: IntCounterVec,
    pub users_scanned: IntCounterVec,
    pub user_matches: IntCounter,
    pub occurrence_matches: IntCounter,
    pub pass_duration: HistogramVec,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_scanned = IntCounterVec::new(
            Opts::new("motif_events_scanned_total", "Events decoded from the log"),
            &["pass"],
        )
        .expect("failed to create events_scanned counter");

        let users_scanned = IntCounterVec::new(
            Opts::new("motif_users_scanned_total", "User boundaries crossed"),
            &["pass"],
        )
        .expect("failed to create users_scanned counter");

        let user_matches = IntCounter::new(
            "motif_user_matches_total",
            "Per-user pattern matches credited",
        )
        .expect("failed to create user_matches counter");

        let occurrence_matches = IntCounter::new(
            "motif_occurrence_matches_total",
            "Per-occurrence pattern matches credited",
        )
        .expect("failed to create occurrence_matches counter");

        let pass_duration = HistogramVec::new(
            HistogramOpts::new("motif_pass_duration_seconds", "Duration of one log pass")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["pass"],
        )
        .expect("failed to create pass_duration histogram");

        registry
            .register(Box::new(events_scanned.clone()))
            .expect("failed to register events_scanned");
        registry
            .register(Box::new(users_scanned.clone()))
            .expect("failed to register users_scanned");
        registry
            .register(Box::new(user_matches.clone()))
            .expect("failed to register user_matches");
        registry
            .register(Box::new(occurrence_matches.clone()))
            .expect("failed to register occurrence_matches");
        registry
            .register(Box::new(pass_duration.clone()))
            .expect("failed to register pass_duration");

        Self {
            registry: Arc::new(registry),
            events_scanned,
            users_scanned,
            user_matches,
            occurrence_matches,
            pass_duration,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the totals of one finished pass.
    pub fn record_pass(&self, pass: &str, events: u64, users: u64, elapsed: Duration) {
        self.events_scanned.with_label_values(&[pass]).inc_by(events);
        self.users_scanned.with_label_values(&[pass]).inc_by(users);
        self.pass_duration
            .with_label_values(&[pass])
            .observe(elapsed.as_secs_f64());
    }

    /// Render all metrics in the Prometheus text format.
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
