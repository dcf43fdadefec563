use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use boxoffice_api::app::services::{Backends, ReservationServices};
use boxoffice_api::app::{build_reservations_app, shutdown_signal};
use boxoffice_auth::Hs256Verifier;
use boxoffice_infra::{ServiceConfig, ServiceKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    boxoffice_observability::init("reservations");

    let cfg = ServiceConfig::from_env(ServiceKind::Reservations).context("invalid configuration")?;
    let backends = Backends::from_config(&cfg).await.context("failed to connect backends")?;

    let (services, workers) = ReservationServices::start(&backends, &cfg)
        .await
        .context("failed to start reservation services")?;
    let verifier = Arc::new(Hs256Verifier::new(cfg.jwt_sign_key.as_bytes()));
    let app = build_reservations_app(Arc::new(services), verifier);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;
    info!(
        addr = %listener.local_addr()?,
        queue_group = %cfg.queue_group,
        booking_duration_secs = cfg.booking_duration.as_secs(),
        "reservations listening"
    );

    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    for worker in workers {
        worker.shutdown().await;
    }
    served.context("server error")
}
