//! Stand-in card processor binary.

use std::env;

use gateway_mock::{DEFAULT_APPROVAL_RATE, MockConfig, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gateway_mock=debug".into()),
        )
        .init();

    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8001".to_string())
        .parse()?;
    let approval_rate: f64 = match env::var("APPROVAL_RATE") {
        Ok(raw) => raw.parse()?,
        Err(_) => DEFAULT_APPROVAL_RATE,
    };
    let secret = env::var("GATEWAY_SECRET").ok().filter(|s| !s.is_empty());

    let config = MockConfig::new(approval_rate, secret);
    tracing::info!(
        approval_rate = config.approval_rate,
        signed = config.secret.is_some(),
        "Starting gateway mock on port {}",
        port
    );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    axum::serve(listener, router(config)).await?;

    Ok(())
}
