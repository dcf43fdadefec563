use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use boxoffice_api::app::services::{Backends, CatalogServices};
use boxoffice_api::app::{build_catalog_app, shutdown_signal};
use boxoffice_auth::Hs256Verifier;
use boxoffice_infra::{ServiceConfig, ServiceKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    boxoffice_observability::init("catalog");

    let cfg = ServiceConfig::from_env(ServiceKind::Catalog).context("invalid configuration")?;
    let backends = Backends::from_config(&cfg).await.context("failed to connect backends")?;

    let services = Arc::new(CatalogServices::new(&backends, &cfg));
    let verifier = Arc::new(Hs256Verifier::new(cfg.jwt_sign_key.as_bytes()));
    let app = build_catalog_app(services, verifier);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;
    info!(addr = %listener.local_addr()?, "catalog listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
