use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

/// Shared metrics for the descheduler, safe for concurrent access.
#[derive(Debug, Default)]
pub struct SharedMetrics {
    /// Recalibration cycles run, one per binding visit.
    pub cycles_total: AtomicU64,
    /// Cycles that ended in an error.
    pub cycle_errors_total: AtomicU64,
    /// Commits lost to a concurrent writer.
    pub conflicts_total: AtomicU64,
    /// Bindings updated with moved replicas.
    pub descheduled_total: AtomicU64,
    /// Replicas moved off undesired clusters.
    pub descheduled_replicas_total: AtomicU64,
    /// Cycles skipped because every cluster was undesired or cooling down.
    pub no_target_total: AtomicU64,
    /// Full resync sweeps over all bindings.
    pub sweeps_total: AtomicU64,
}

impl SharedMetrics {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 7] = [
            ("cycles_total", "Recalibration cycles run.", &self.cycles_total),
            ("cycle_errors_total", "Recalibration cycles that failed.", &self.cycle_errors_total),
            ("conflicts_total", "Binding commits lost to a concurrent write.", &self.conflicts_total),
            ("descheduled_total", "Bindings updated by the descheduler.", &self.descheduled_total),
            (
                "descheduled_replicas_total",
                "Replicas moved off undesired clusters.",
                &self.descheduled_replicas_total,
            ),
            ("no_target_total", "Cycles with no eligible target cluster.", &self.no_target_total),
            ("sweeps_total", "Full resync sweeps.", &self.sweeps_total),
        ];

        let mut body = String::new();
        for (name, help, value) in counters {
            body.push_str(&format!(
                "# HELP meridian_descheduler_{name} {help}\n\
                 # TYPE meridian_descheduler_{name} counter\n\
                 meridian_descheduler_{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        body
    }
}

/// GET /metrics: Prometheus text exposition format.
pub async fn metrics_handler(State(metrics): State<Arc<SharedMetrics>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, metrics.render())
}

/// GET /healthz: liveness check.
pub async fn healthz_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "ok")
}

pub fn router(metrics: Arc<SharedMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics)
}
