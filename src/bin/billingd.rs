use anyhow::Context;
use reportwriterd::billing::{build_router, BillingConfig, BillingState};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "billingd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BillingConfig::from_env()
        .context("PAYMENT_SECRET_KEY and PAYMENT_WEBHOOK_SECRET must be set")?;
    let state = BillingState {
        http: reqwest::Client::new(),
        config: Arc::new(config),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port: u16 = std::env::var("BILLINGD_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8787);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("could not bind port {port}"))?;
    tracing::info!("billingd listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
