//! # Settlement Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the ledger adapters
//! - Build the guarded card processor client and the orchestrator
//! - Start the reconciliation sweeper and the alert worker
//! - Start the HTTP server

mod config;

use std::time::Duration;

use opentelemetry::global;
use opentelemetry_sdk::{metrics::SdkMeterProvider, propagation::TraceContextPropagator, trace as sdktrace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settlement_hex::{
    ReconciliationSweeper, SettlementOrchestrator,
    inbound::{HttpServer, JwtVerifier},
    outbound::{GuardedGateway, HttpGateway},
};
use settlement_repo::{alerts::AlertWorker, build_repo};

const CONNECT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

fn init_tracer() -> anyhow::Result<(sdktrace::Tracer, sdktrace::SdkTracerProvider)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // Use gRPC exporter with batch processing (non-blocking)
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok((provider.tracer("settlement-service"), provider))
}

/// Installs the global meter provider the HTTP metrics layer reports to.
fn init_meter() -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .build()?;

    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .build();

    global::set_meter_provider(provider.clone());
    Ok(provider)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize OpenTelemetry tracing and metrics
    let (otel_tracer, otel_provider) = init_tracer()?;
    let meter_provider = init_meter()?;
    let telemetry = tracing_opentelemetry::layer().with_tracer(otel_tracer);

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,settlement_app=debug,settlement_hex=debug,settlement::alert=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry)
        .init();

    // Load configuration
    let config = config::Config::from_env()?;

    tracing::info!("Starting settlement server on port {}", config.port);
    tracing::info!(gateway = %config.gateway_url, "Using card processor");

    // Build repository (handles connection and migration)
    let repo = build_repo(&config.database_url).await?;

    // Card processor client behind the timeout/retry guard
    let mut processor = HttpGateway::new(config.gateway_url.clone());
    if let Some(secret) = &config.gateway_secret {
        processor = processor.with_secret(secret.clone());
    }
    let gateway = GuardedGateway::new(processor, config.gateway_timeout)
        .with_connect_retries(config.gateway_connect_retries, CONNECT_RETRY_BACKOFF);

    anyhow::ensure!(
        config.stale_pending_after > gateway.worst_case(),
        "STALE_PENDING_AFTER_SECS ({}s) must exceed the longest possible charge ({:?})",
        config.stale_pending_after.as_secs(),
        gateway.worst_case()
    );

    let orchestrator = SettlementOrchestrator::with_stale_after(
        repo.clone(),
        repo.clone(),
        gateway,
        config.stale_pending_after,
    );

    // Background workers
    tokio::spawn(ReconciliationSweeper::new(orchestrator.clone(), config.reconcile_interval).run());

    match &config.alert_webhook_url {
        Some(url) => {
            let worker =
                AlertWorker::new(repo.clone(), url.clone(), config.alert_webhook_secret.clone());
            tokio::spawn(worker.run());
        }
        None => tracing::warn!(
            "ALERT_WEBHOOK_URL not set; reconciliation alerts stay in the outbox and the log"
        ),
    }

    // Create and run the HTTP server
    let verifier = JwtVerifier::new(&config.jwt_secret, config.jwt_issuer.as_deref());
    let server = HttpServer::with_rate_limit(orchestrator, verifier, config.rate_limit_per_minute);
    let addr = format!("0.0.0.0:{}", config.port);

    server.run(&addr).await?;

    // Ensure traces and metrics are flushed before exit
    let _ = otel_provider.shutdown();
    let _ = meter_provider.shutdown();
    Ok(())
}
