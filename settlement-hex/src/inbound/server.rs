//! HTTP Server configuration and startup.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use settlement_types::{BillLedger, PaymentGateway, PaymentLedger};

use super::auth::{JwtVerifier, auth_middleware};
use super::handlers::{self, AppState};
use super::rate_limit::{RateLimiterState, rate_limit_middleware};
use crate::SettlementOrchestrator;
use crate::openapi::ApiDoc;

/// HTTP Server for the Settlement API.
pub struct HttpServer<B: BillLedger, P: PaymentLedger, G: PaymentGateway> {
    state: Arc<AppState<B, P, G>>,
    verifier: Arc<JwtVerifier>,
    rate_limiter: Arc<RateLimiterState>,
}

impl<B: BillLedger, P: PaymentLedger, G: PaymentGateway> HttpServer<B, P, G> {
    /// Creates a new HTTP server with the default rate limit.
    pub fn new(orchestrator: SettlementOrchestrator<B, P, G>, verifier: JwtVerifier) -> Self {
        Self {
            state: Arc::new(AppState { orchestrator }),
            verifier: Arc::new(verifier),
            rate_limiter: Arc::new(RateLimiterState::default()), // 100 req/min default
        }
    }

    /// Creates a new HTTP server with custom rate limiting.
    pub fn with_rate_limit(
        orchestrator: SettlementOrchestrator<B, P, G>,
        verifier: JwtVerifier,
        requests_per_minute: u32,
    ) -> Self {
        Self {
            state: Arc::new(AppState { orchestrator }),
            verifier: Arc::new(verifier),
            rate_limiter: Arc::new(RateLimiterState::per_minute(requests_per_minute)),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        let api = Router::new()
            .route("/health", get(handlers::health))
            .route("/api/payments", post(handlers::settle::<B, P, G>))
            .route("/api/payments/{id}", get(handlers::get_payment::<B, P, G>))
            .route(
                "/api/accounts/{account}/bills",
                get(handlers::list_bills::<B, P, G>),
            )
            .route(
                "/api/accounts/{account}/payments",
                get(handlers::list_payments::<B, P, G>),
            )
            .route(
                "/api/reconciliation/payments",
                get(handlers::list_flagged::<B, P, G>),
            )
            .route(
                "/api/reconciliation/sweep",
                post(handlers::sweep::<B, P, G>),
            )
            .route(
                "/api/reconciliation/payments/{id}/commit",
                post(handlers::commit_flagged::<B, P, G>),
            )
            .route(
                "/api/reconciliation/payments/{id}/resolve",
                post(handlers::resolve_stale::<B, P, G>),
            )
            .layer(metrics)
            .layer(middleware::from_fn_with_state(
                self.rate_limiter.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.verifier.clone(),
                auth_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        // Docs are merged after the auth layer so they stay public.
        api.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining open connections");
}
