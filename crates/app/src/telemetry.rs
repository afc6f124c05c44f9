use std::{
    fmt::Write as _,
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use metrics::{counter, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::time::UtcTime, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt,
    util::TryInitError, EnvFilter, Layer,
};

use live_notifier_util::{AppConfig, Environment};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to initialize prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "info";

static TRACING_READY: OnceLock<()> = OnceLock::new();
static RECORDER: Mutex<Option<PrometheusHandle>> = Mutex::new(None);
static STARTED_AT: OnceLock<Instant> = OnceLock::new();

enum MetricKind {
    Counter,
    Histogram,
}

struct MetricSpec {
    name: &'static str,
    kind: MetricKind,
    help: &'static str,
    /// Label key and every value it takes, pre-registered at zero.
    series: Option<(&'static str, &'static [&'static str])>,
}

const CATALOGUE: &[MetricSpec] = &[
    MetricSpec {
        name: "eventsub_ingress_total",
        kind: MetricKind::Counter,
        help: "Authenticated EventSub deliveries, labelled by message type",
        series: Some(("type", &["verification", "notification", "revocation", "unknown"])),
    },
    MetricSpec {
        name: "eventsub_invalid_signature_total",
        kind: MetricKind::Counter,
        help: "EventSub deliveries rejected because the signature did not verify",
        series: None,
    },
    MetricSpec {
        name: "webhook_ack_latency_seconds",
        kind: MetricKind::Histogram,
        help: "Seconds spent acknowledging an EventSub delivery",
        series: None,
    },
    MetricSpec {
        name: "eventsub_reconcile_total",
        kind: MetricKind::Counter,
        help: "Per-broadcaster subscription reconciliations, labelled by outcome",
        series: Some(("outcome", &["created", "unchanged", "rate_limited", "failed"])),
    },
    MetricSpec {
        name: "eventsub_subscription_delete_total",
        kind: MetricKind::Counter,
        help: "Stale subscription deletions, labelled by result",
        series: Some(("result", &["ok", "error"])),
    },
    MetricSpec {
        name: "notification_dispatch_total",
        kind: MetricKind::Counter,
        help: "Go-live notifications handled, labelled by result",
        series: Some(("result", &["sent", "offline", "fetch_failed", "send_failed"])),
    },
];

fn git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Console layer for the environment: human-readable locally, JSON lines in production.
fn log_layer(environment: Environment) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::rfc_3339());
    match environment {
        Environment::Production => layer.json().boxed(),
        Environment::Development | Environment::Test => layer.pretty().boxed(),
    }
}

pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    if TRACING_READY.get().is_some() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(log_layer(config.environment))
        .with(filter)
        .try_init()?;

    TRACING_READY.set(()).ok();
    tracing::info!(
        stage = "telemetry",
        env = %config.environment.as_str(),
        version = BUILD_VERSION,
        git_sha = git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the process-wide Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let mut recorder = RECORDER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = recorder.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_catalogue();
    STARTED_AT.get_or_init(Instant::now);
    *recorder = Some(handle.clone());
    Ok(handle)
}

fn describe_catalogue() {
    for spec in CATALOGUE {
        match spec.kind {
            MetricKind::Counter => describe_counter!(spec.name, spec.help),
            MetricKind::Histogram => describe_histogram!(spec.name, spec.help),
        }
        if let Some((key, values)) = spec.series {
            for value in values {
                counter!(spec.name, key => *value).increment(0);
            }
        }
    }
}

/// Prometheus exposition of the recorder plus build and uptime gauges.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let mut body = handle.render();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    let uptime = STARTED_AT
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or_default();
    let _ = write!(
        body,
        "# TYPE app_build_info gauge\n\
         app_build_info{{version=\"{BUILD_VERSION}\",git=\"{}\"}} 1\n\
         # TYPE app_uptime_seconds gauge\n\
         app_uptime_seconds {uptime}\n",
        git_sha()
    );
    body
}
