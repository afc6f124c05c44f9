use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::task::TaskTracker;

use crate::notifier::LiveNotifier;
use crate::{telemetry, webhook};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    webhook_secret: Arc<[u8]>,
    notifier: LiveNotifier,
    tasks: TaskTracker,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        webhook_secret: Arc<[u8]>,
        notifier: LiveNotifier,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            metrics,
            webhook_secret,
            notifier,
            tasks,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.webhook_secret
    }

    pub fn notifier(&self) -> &LiveNotifier {
        &self.notifier
    }

    /// Tracker for notification work that outlives the webhook response.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/webhook", post(webhook::handle))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
