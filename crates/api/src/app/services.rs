//! Infrastructure wiring: stores, bus, and the services built on them.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

use boxoffice_events::{BusError, EventBus, InMemoryEventBus};
use boxoffice_infra::store::{
    BookingStore, InMemoryBookingStore, InMemoryItemStore, ItemStore, PostgresBookingStore, PostgresItemStore,
    StoreError, bootstrap_schema,
};
use boxoffice_infra::{
    CatalogListener, ExpirySweeper, ItemLedger, ItemReplica, ReservationEngine, ServiceConfig, WorkerHandle,
};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    /// Persistent stores need a bus shared across processes.
    #[error("persistent stores require the redis event bus; build with the `redis` feature")]
    NoDurableBus,
}

/// Store and bus handles shared by a service's components.
#[derive(Clone)]
pub struct Backends {
    pub items: Arc<dyn ItemStore>,
    pub bookings: Arc<dyn BookingStore>,
    pub bus: Arc<dyn EventBus>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self::in_memory_with_bus(Arc::new(InMemoryEventBus::new()))
    }

    /// Fresh in-memory stores on a caller-provided bus (lets two services
    /// share one in-process bus).
    pub fn in_memory_with_bus(bus: Arc<dyn EventBus>) -> Self {
        Self {
            items: Arc::new(InMemoryItemStore::new()),
            bookings: Arc::new(InMemoryBookingStore::new()),
            bus,
        }
    }

    pub async fn from_config(cfg: &ServiceConfig) -> Result<Self, BootstrapError> {
        let Some(database_url) = cfg.database_url.as_deref().filter(|_| cfg.use_persistent_stores) else {
            info!("using in-memory stores and bus");
            return Ok(Self::in_memory());
        };

        let bus = persistent_bus(cfg)?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(cfg.store_timeout)
            .connect(database_url)
            .await?;
        bootstrap_schema(&pool).await?;
        info!("connected to postgres");

        Ok(Self {
            items: Arc::new(PostgresItemStore::new(pool.clone())),
            bookings: Arc::new(PostgresBookingStore::new(pool)),
            bus,
        })
    }
}

#[cfg(feature = "redis")]
fn persistent_bus(cfg: &ServiceConfig) -> Result<Arc<dyn EventBus>, BootstrapError> {
    let url = cfg.redis_url.as_deref().unwrap_or("redis://localhost:6379");
    let bus = boxoffice_infra::event_bus::RedisStreamsEventBus::new(url)?;
    info!("using redis streams event bus");
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "redis"))]
fn persistent_bus(_cfg: &ServiceConfig) -> Result<Arc<dyn EventBus>, BootstrapError> {
    Err(BootstrapError::NoDurableBus)
}

#[derive(Debug, Clone)]
pub struct CatalogServices {
    pub ledger: ItemLedger,
}

impl CatalogServices {
    pub fn new(backends: &Backends, cfg: &ServiceConfig) -> Self {
        Self {
            ledger: ItemLedger::new(backends.items.clone(), backends.bus.clone()).with_timeout(cfg.store_timeout),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReservationServices {
    pub engine: ReservationEngine,
    pub booking_duration: Duration,
}

impl ReservationServices {
    /// Build the engine and start its background workers (catalog listener,
    /// and the expiry sweeper when configured).
    pub async fn start(backends: &Backends, cfg: &ServiceConfig) -> Result<(Self, Vec<WorkerHandle>), BootstrapError> {
        let replica = ItemReplica::new(backends.items.clone()).with_timeout(cfg.store_timeout);
        let engine = ReservationEngine::new(replica.clone(), backends.bookings.clone(), backends.bus.clone())
            .with_timeout(cfg.store_timeout);

        let mut workers = vec![CatalogListener::spawn(backends.bus.clone(), replica, &cfg.queue_group).await?];
        if let Some(interval) = cfg.expiry_sweep_interval {
            let sweeper = ExpirySweeper::new(backends.bookings.clone(), backends.bus.clone())
                .with_timeout(cfg.store_timeout);
            workers.push(sweeper.spawn(interval));
        }

        let services = Self {
            engine,
            booking_duration: cfg.booking_duration,
        };
        Ok((services, workers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_infra::ServiceKind;

    fn persistent_config(redis_url: &str) -> ServiceConfig {
        ServiceConfig::from_lookup(ServiceKind::Reservations, |var| match var {
            "USE_PERSISTENT_STORES" => Some("true".into()),
            "JWT_SIGN_KEY" => Some("k".into()),
            "DATABASE_URL" => Some("postgres://unused".into()),
            "REDIS_URL" => Some(redis_url.into()),
            _ => None,
        })
        .unwrap()
    }

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn persistent_mode_builds_the_bus_before_touching_postgres() {
        let err = Backends::from_config(&persistent_config("not a url")).await.err().unwrap();
        assert!(matches!(err, BootstrapError::Bus(BusError::Connection(_))));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn persistent_mode_without_redis_refuses_to_start() {
        let err = Backends::from_config(&persistent_config("redis://localhost:6379"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BootstrapError::NoDurableBus));
    }

    #[tokio::test]
    async fn dev_mode_uses_in_memory_backends() {
        let cfg = ServiceConfig::from_lookup(ServiceKind::Catalog, |_| None).unwrap();
        assert!(Backends::from_config(&cfg).await.is_ok());
    }
}
