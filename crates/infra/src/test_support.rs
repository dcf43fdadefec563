//! Fakes shared by the service tests.

use std::time::Duration;

use async_trait::async_trait;

use boxoffice_catalog::Item;
use boxoffice_core::{BookingId, ExpectedVersion, ItemId, Price};
use boxoffice_events::{BusError, EventBus, RawEnvelope, Subject, Subscription};
use boxoffice_reservations::{Booking, BookingStatus};

use crate::store::{BookingFilter, BookingStore, ItemRecord, ItemStore, StoreError, UpsertOutcome};

pub(crate) fn item(id: &str, version: u64) -> Item {
    Item {
        id: ItemId::parse(id).unwrap(),
        title: format!("item {id} v{version}"),
        price: Price::new(20.0).unwrap(),
        version,
    }
}

fn down() -> StoreError {
    StoreError::Backend("connection refused".into())
}

/// Item store whose every call fails.
pub(crate) struct BrokenItemStore;

#[async_trait]
impl ItemStore for BrokenItemStore {
    async fn create(&self, _: ItemRecord) -> Result<(), StoreError> {
        Err(down())
    }

    async fn read_by_id(&self, _: &ItemId) -> Result<Option<ItemRecord>, StoreError> {
        Err(down())
    }

    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError> {
        Err(down())
    }

    async fn update(&self, _: ItemRecord, _: ExpectedVersion) -> Result<bool, StoreError> {
        Err(down())
    }

    async fn upsert_if_newer(&self, _: ItemRecord) -> Result<UpsertOutcome, StoreError> {
        Err(down())
    }
}

/// Booking store that never answers within any reasonable timeout.
pub(crate) struct SlowBookingStore(pub Duration);

#[async_trait]
impl BookingStore for SlowBookingStore {
    async fn create_exclusive(&self, _: Booking) -> Result<(), StoreError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    async fn read_by_id(&self, _: &BookingId) -> Result<Option<Booking>, StoreError> {
        tokio::time::sleep(self.0).await;
        Ok(None)
    }

    async fn search(&self, _: BookingFilter) -> Result<Vec<Booking>, StoreError> {
        tokio::time::sleep(self.0).await;
        Ok(vec![])
    }

    async fn update_status(&self, _: &BookingId, _: BookingStatus, _: BookingStatus) -> Result<bool, StoreError> {
        tokio::time::sleep(self.0).await;
        Ok(true)
    }
}

/// Bus that refuses to publish.
pub(crate) struct FailingBus;

#[async_trait]
impl EventBus for FailingBus {
    async fn publish(&self, _: RawEnvelope) -> Result<(), BusError> {
        Err(BusError::Connection("bus unreachable".into()))
    }

    async fn subscribe_queue_group(&self, _: Subject, _: &str) -> Result<Subscription, BusError> {
        Err(BusError::Connection("bus unreachable".into()))
    }
}
