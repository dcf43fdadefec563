use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use boxoffice_core::{BookingId, ExpectedVersion, ItemId};
use boxoffice_reservations::{Booking, BookingStatus};

use super::{BookingFilter, BookingStore, ItemRecord, ItemStore, StoreError, UpsertOutcome};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock().map_err(|_| StoreError::Backend("store lock poisoned".into()))
}

/// In-memory item store (single lock; intended for tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    inner: Mutex<HashMap<ItemId, ItemRecord>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn create(&self, record: ItemRecord) -> Result<(), StoreError> {
        let mut map = lock(&self.inner)?;
        if map.contains_key(&record.item.id) {
            return Err(StoreError::Duplicate(record.item.id.to_string()));
        }
        map.insert(record.item.id.clone(), record);
        Ok(())
    }

    async fn read_by_id(&self, id: &ItemId) -> Result<Option<ItemRecord>, StoreError> {
        Ok(lock(&self.inner)?.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError> {
        let mut records: Vec<_> = lock(&self.inner)?.values().cloned().collect();
        records.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        Ok(records)
    }

    async fn update(&self, record: ItemRecord, expected: ExpectedVersion) -> Result<bool, StoreError> {
        let mut map = lock(&self.inner)?;
        match map.get_mut(&record.item.id) {
            Some(current) if expected.matches(current.item.version) => {
                *current = record;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_if_newer(&self, record: ItemRecord) -> Result<UpsertOutcome, StoreError> {
        let mut map = lock(&self.inner)?;
        match map.get_mut(&record.item.id) {
            None => {
                map.insert(record.item.id.clone(), record);
                Ok(UpsertOutcome::Inserted)
            }
            Some(current) if record.item.version >= current.item.version => {
                current.item = record.item;
                Ok(UpsertOutcome::Updated)
            }
            Some(_) => Ok(UpsertOutcome::Stale),
        }
    }
}

/// In-memory booking store.
///
/// Bookings are kept in insertion order; the exclusive insert checks and
/// inserts under one lock.
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    inner: Mutex<Vec<Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn create_exclusive(&self, booking: Booking) -> Result<(), StoreError> {
        let mut bookings = lock(&self.inner)?;
        if bookings.iter().any(|b| b.id == booking.id) {
            return Err(StoreError::Duplicate(booking.id.to_string()));
        }
        if booking.status.is_active()
            && bookings
                .iter()
                .any(|b| b.item_id == booking.item_id && b.status.is_active())
        {
            return Err(StoreError::ActiveBookingExists(booking.item_id));
        }
        bookings.push(booking);
        Ok(())
    }

    async fn read_by_id(&self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(lock(&self.inner)?.iter().find(|b| &b.id == id).cloned())
    }

    async fn search(&self, filter: BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let bookings = lock(&self.inner)?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(bookings
            .iter()
            .rev()
            .filter(|b| filter.matches(b))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: &BookingId, from: BookingStatus, to: BookingStatus) -> Result<bool, StoreError> {
        let mut bookings = lock(&self.inner)?;
        match bookings.iter_mut().find(|b| &b.id == id) {
            Some(booking) if booking.status == from => {
                booking.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
