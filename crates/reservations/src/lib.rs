//! Reservations domain module.
//!
//! Bookings, their lifecycle state machine and the events published when a
//! booking is made or cancelled. Pure domain logic: the reservation engine in
//! `boxoffice-infra` does the IO.

pub mod booking;
pub mod events;
pub mod status;

pub use booking::{Booking, expires_at_for};
pub use events::{BookingCancelled, BookingCreated, ItemSnapshot};
pub use status::BookingStatus;
