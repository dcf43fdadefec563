//! Bus subjects, one per event kind.
//!
//! The mapping from kind to subject string is fixed at compile time; there is
//! no registry to populate at startup.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subject {
    #[serde(rename = "ticket:created")]
    ItemCreated,
    #[serde(rename = "ticket:updated")]
    ItemUpdated,
    #[serde(rename = "order:created")]
    BookingCreated,
    #[serde(rename = "order:cancelled")]
    BookingCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subject: {0}")]
pub struct UnknownSubject(pub String);

impl Subject {
    pub const ALL: [Subject; 4] = [
        Subject::ItemCreated,
        Subject::ItemUpdated,
        Subject::BookingCreated,
        Subject::BookingCancelled,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Subject::ItemCreated => "ticket:created",
            Subject::ItemUpdated => "ticket:updated",
            Subject::BookingCreated => "order:created",
            Subject::BookingCancelled => "order:cancelled",
        }
    }
}

impl core::fmt::Display for Subject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = UnknownSubject;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subject::ALL
            .into_iter()
            .find(|subject| subject.as_str() == s)
            .ok_or_else(|| UnknownSubject(s.to_string()))
    }
}
