use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxoffice_core::{BookingId, DomainError, ItemId, UserId};

use crate::BookingStatus;

/// A user's claim on a single item.
///
/// Bookings are never deleted; cancellation is a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub item_id: ItemId,
    pub status: BookingStatus,
    pub expires_at: DateTime<Utc>,
}

impl Booking {
    /// A fresh booking in `Created`.
    pub fn new(id: BookingId, user_id: UserId, item_id: ItemId, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            item_id,
            status: BookingStatus::Created,
            expires_at,
        }
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Move to `to`, returning the previous status.
    pub fn transition_to(&mut self, to: BookingStatus) -> Result<BookingStatus, DomainError> {
        let from = self.status;
        self.status = from.transition(to)?;
        Ok(from)
    }

    pub fn cancel(&mut self) -> Result<BookingStatus, DomainError> {
        self.transition_to(BookingStatus::Cancelled)
    }
}

/// Expiry for a booking made at `now`.
///
/// A zero duration means "expire immediately" and yields the Unix epoch.
pub fn expires_at_for(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    if duration.is_zero() {
        return DateTime::<Utc>::UNIX_EPOCH;
    }
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
