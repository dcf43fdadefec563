//! Durable store boundary for items and bookings.
//!
//! The services depend only on these traits. Two implementations ship:
//! in-memory (dev/tests) and Postgres.
//!
//! All mutation goes through a single atomic primitive per operation
//! (exclusive insert, version-guarded upsert, compare-and-swap), so callers
//! never need an in-process lock and several service instances can share a
//! backend.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use boxoffice_catalog::Item;
use boxoffice_core::{BookingId, ExpectedVersion, ItemId, UserId};
use boxoffice_reservations::{Booking, BookingStatus};

pub use in_memory::{InMemoryBookingStore, InMemoryItemStore};
pub use postgres::{PostgresBookingStore, PostgresItemStore, bootstrap_schema};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store call timed out")]
    Timeout,

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("an active booking already exists for item {0}")]
    ActiveBookingExists(ItemId),

    #[error("stored record could not be decoded: {0}")]
    Codec(String),
}

/// An item row. `owner` is set in the catalog's own store and absent in a replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub item: Item,
    pub owner: Option<UserId>,
}

impl ItemRecord {
    pub fn owned(item: Item, owner: UserId) -> Self {
        Self {
            item,
            owner: Some(owner),
        }
    }

    pub fn replicated(item: Item) -> Self {
        Self { item, owner: None }
    }
}

/// Result of a version-guarded upsert.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The stored version was newer; nothing changed.
    Stale,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert a new item. Fails with `Duplicate` if the id is taken.
    async fn create(&self, record: ItemRecord) -> Result<(), StoreError>;

    async fn read_by_id(&self, id: &ItemId) -> Result<Option<ItemRecord>, StoreError>;

    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError>;

    /// Replace an existing item if its stored version satisfies `expected`.
    ///
    /// Returns `false` when no row matched (missing, or version moved on).
    async fn update(&self, record: ItemRecord, expected: ExpectedVersion) -> Result<bool, StoreError>;

    /// Insert, or replace when `record.item.version >= stored.version`.
    async fn upsert_if_newer(&self, record: ItemRecord) -> Result<UpsertOutcome, StoreError>;
}

/// Search criteria for bookings. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub item_ids: Vec<ItemId>,
    pub user_ids: Vec<UserId>,
    pub statuses: Vec<BookingStatus>,
    /// Only bookings with `expires_at <= expired_by`.
    pub expired_by: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl BookingFilter {
    /// Active bookings referencing `item_id` (existence check).
    pub fn active_for_item(item_id: ItemId) -> Self {
        Self {
            item_ids: vec![item_id],
            statuses: BookingStatus::ACTIVE.to_vec(),
            limit: Some(1),
            ..Self::default()
        }
    }

    pub fn for_user(user_id: UserId, limit: usize) -> Self {
        Self {
            user_ids: vec![user_id],
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        (self.item_ids.is_empty() || self.item_ids.contains(&booking.item_id))
            && (self.user_ids.is_empty() || self.user_ids.contains(&booking.user_id))
            && (self.statuses.is_empty() || self.statuses.contains(&booking.status))
            && self.expired_by.is_none_or(|cutoff| booking.is_expired(cutoff))
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Insert a booking unless an active booking already references its item.
    ///
    /// The existence check and the insert are one atomic step; a concurrent
    /// winner surfaces here as `ActiveBookingExists`.
    async fn create_exclusive(&self, booking: Booking) -> Result<(), StoreError>;

    async fn read_by_id(&self, id: &BookingId) -> Result<Option<Booking>, StoreError>;

    /// Matching bookings, newest first.
    async fn search(&self, filter: BookingFilter) -> Result<Vec<Booking>, StoreError>;

    /// Set status to `to` only if it is currently `from`.
    ///
    /// Returns `false` when the booking is missing or its status moved on.
    async fn update_status(&self, id: &BookingId, from: BookingStatus, to: BookingStatus) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S> ItemStore for Arc<S>
where
    S: ItemStore + ?Sized,
{
    async fn create(&self, record: ItemRecord) -> Result<(), StoreError> {
        (**self).create(record).await
    }

    async fn read_by_id(&self, id: &ItemId) -> Result<Option<ItemRecord>, StoreError> {
        (**self).read_by_id(id).await
    }

    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError> {
        (**self).list().await
    }

    async fn update(&self, record: ItemRecord, expected: ExpectedVersion) -> Result<bool, StoreError> {
        (**self).update(record, expected).await
    }

    async fn upsert_if_newer(&self, record: ItemRecord) -> Result<UpsertOutcome, StoreError> {
        (**self).upsert_if_newer(record).await
    }
}

#[async_trait]
impl<S> BookingStore for Arc<S>
where
    S: BookingStore + ?Sized,
{
    async fn create_exclusive(&self, booking: Booking) -> Result<(), StoreError> {
        (**self).create_exclusive(booking).await
    }

    async fn read_by_id(&self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        (**self).read_by_id(id).await
    }

    async fn search(&self, filter: BookingFilter) -> Result<Vec<Booking>, StoreError> {
        (**self).search(filter).await
    }

    async fn update_status(&self, id: &BookingId, from: BookingStatus, to: BookingStatus) -> Result<bool, StoreError> {
        (**self).update_status(id, from, to).await
    }
}
