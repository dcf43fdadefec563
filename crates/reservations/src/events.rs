//! Booking lifecycle event contracts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxoffice_core::{ItemId, Price};
use boxoffice_events::{Event, Subject};

use crate::Booking;

/// The referenced item as it was when the booking was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub price: Price,
}

/// Event: BookingCreated (published on `order:created`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreated {
    pub booking: Booking,
    pub item: ItemSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingCancelled (published on `order:cancelled`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCancelled {
    pub booking: Booking,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

impl Event for BookingCreated {
    fn subject(&self) -> Subject {
        Subject::BookingCreated
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Event for BookingCancelled {
    fn subject(&self) -> Subject {
        Subject::BookingCancelled
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
