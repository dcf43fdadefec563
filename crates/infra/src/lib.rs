//! Infrastructure layer: stores, bus transports, config, and the services
//! built on them (Item Ledger, Item Replica, Reservation Engine).

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod listener;
pub mod replica;
pub mod store;
pub mod sweeper;
pub mod timeout;
pub mod worker;

mod publish;

#[cfg(test)]
mod test_support;

pub use catalog::ItemLedger;
pub use config::{ConfigError, ServiceConfig, ServiceKind};
pub use engine::{BookingView, ReservationEngine};
pub use error::{CatalogError, ReservationError, ServiceError};
pub use listener::CatalogListener;
pub use replica::{ItemReplica, ReplicaError};
pub use sweeper::ExpirySweeper;
pub use worker::WorkerHandle;
