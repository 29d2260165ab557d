use crate::config::{LogFormat, TelemetryConfig};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Wires up tracing and the Prometheus exporter. Call once at startup,
/// before anything logs or records a metric.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_tracing(config);
    if config.metrics_enabled {
        init_metrics(config.metrics_port)?;
    }
    Ok(())
}

fn init_tracing(config: &TelemetryConfig) {
    // RUST_LOG takes precedence when set; the configured level otherwise,
    // with the chatty HTTP and database internals held at warn.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn default_directives(log_level: &str) -> String {
    format!("{log_level},sqlx=warn,hyper=warn,reqwest=warn")
}

fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!(
        "extractor_resources_extracted",
        "Resources extracted per resource type in completed runs"
    );
    describe_counter!(
        "extractor_resources_written",
        "Rows inserted into bronze storage, duplicates excluded"
    );
    describe_counter!(
        "extractor_cursor_writes",
        "Cursor advances after fully successful runs"
    );
    describe_histogram!(
        "extractor_fetch_duration_ms",
        Unit::Milliseconds,
        "Wall time per page fetch, retries included"
    );
    describe_histogram!(
        "extractor_page_resources",
        "Resources returned per fetched page"
    );

    tracing::info!(port, "Metrics endpoint started on /metrics");
    Ok(())
}
