use std::sync::Arc;

use anyhow::Context;

use bastion_api::app::{build_app, services::build_services};
use bastion_auth::SecurityConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bastion_observability::init();

    let config = SecurityConfig::from_env().context("load security config")?;
    let services = Arc::new(build_services(config).context("build services")?);
    let app = build_app(services);

    let bind = std::env::var("BASTION_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
