//! Booking lifecycle state machine.
//!
//! ```text
//! Created ──► AwaitingPayment ──► Completed
//!    │               │
//!    └──────┬────────┘
//!           ▼
//!       Cancelled
//! ```
//!
//! `Completed` and `Cancelled` are terminal.

use serde::{Deserialize, Serialize};

use boxoffice_core::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Created,
    AwaitingPayment,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Created,
        BookingStatus::AwaitingPayment,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    /// Statuses that hold the item: at most one booking per item may be in one of these.
    pub const ACTIVE: [BookingStatus; 3] = [
        BookingStatus::Created,
        BookingStatus::AwaitingPayment,
        BookingStatus::Completed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Created => "Created",
            BookingStatus::AwaitingPayment => "AwaitingPayment",
            BookingStatus::Completed => "Completed",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    pub fn can_transition_to(self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Created, AwaitingPayment) | (AwaitingPayment, Completed) | (Created | AwaitingPayment, Cancelled)
        )
    }

    /// Validate a move, returning the new status.
    pub fn transition(self, to: BookingStatus) -> Result<BookingStatus, DomainError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(DomainError::invalid_transition(self, to))
        }
    }
}

impl core::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
