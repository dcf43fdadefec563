//! Expiry sweeper: cancels `Created` bookings whose `expires_at` has passed.
//!
//! Off unless an interval is configured. Each cancellation is a status CAS
//! (`Created -> Cancelled`), so a sweep racing a user cancellation or a
//! payment collaborator never overwrites their transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use boxoffice_events::EventBus;
use boxoffice_reservations::{BookingCancelled, BookingStatus};

use crate::error::ServiceError;
use crate::publish::publish_event;
use crate::store::{BookingFilter, BookingStore};
use crate::timeout::{DEFAULT_CALL_TIMEOUT, store_call};
use crate::worker::{WorkerHandle, shutdown_requested};

/// Bookings examined per sweep.
const SWEEP_BATCH: usize = 500;

#[derive(Clone)]
pub struct ExpirySweeper {
    bookings: Arc<dyn BookingStore>,
    bus: Arc<dyn EventBus>,
    timeout: Duration,
}

impl ExpirySweeper {
    pub fn new(bookings: Arc<dyn BookingStore>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            bookings,
            bus,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cancel every expired `Created` booking as of `now`. Returns how many
    /// were cancelled by this sweep.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let filter = BookingFilter {
            statuses: vec![BookingStatus::Created],
            expired_by: Some(now),
            limit: Some(SWEEP_BATCH),
            ..BookingFilter::default()
        };
        let expired = store_call(self.timeout, self.bookings.search(filter)).await?;

        let mut cancelled = 0;
        for mut booking in expired {
            let from = booking.cancel()?;
            if !store_call(self.timeout, self.bookings.update_status(&booking.id, from, BookingStatus::Cancelled)).await? {
                debug!(booking_id = %booking.id, "booking changed before expiry; skipped");
                continue;
            }
            cancelled += 1;

            let event = BookingCancelled {
                item_id: booking.item_id.clone(),
                booking,
                occurred_at: now,
            };
            let booking_id = event.booking.id.clone();
            if let Err(e) = publish_event(self.bus.as_ref(), self.timeout, event).await {
                error!(%booking_id, error = %e, "booking persisted but event not published");
            }
        }

        if cancelled > 0 {
            info!(cancelled, "expired bookings cancelled");
        }
        Ok(cancelled)
    }

    /// Run [`Self::sweep_once`] every `interval` until shut down.
    pub fn spawn(self, interval: Duration) -> WorkerHandle {
        WorkerHandle::spawn("expiry-sweeper", move |mut shutdown| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.sweep_once(Utc::now()).await {
                    warn!(error = %e, "expiry sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::{BookingId, ItemId, UserId};
    use boxoffice_events::{InMemoryEventBus, Subject};
    use boxoffice_reservations::Booking;

    use crate::store::InMemoryBookingStore;

    fn booking(item: &str, expires_at: DateTime<Utc>) -> Booking {
        Booking::new(
            BookingId::generate(),
            UserId::parse("u1").unwrap(),
            ItemId::parse(item).unwrap(),
            expires_at,
        )
    }

    #[tokio::test]
    async fn only_expired_created_bookings_are_cancelled() {
        let now = Utc::now();
        let store = Arc::new(InMemoryBookingStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let mut cancelled = bus.subscribe_queue_group(Subject::BookingCancelled, "payments").await.unwrap();

        let stale = booking("A", DateTime::<Utc>::UNIX_EPOCH);
        let fresh = booking("B", now + chrono::Duration::minutes(10));
        let paying = booking("C", DateTime::<Utc>::UNIX_EPOCH);
        for b in [&stale, &fresh, &paying] {
            store.create_exclusive(b.clone()).await.unwrap();
        }
        assert!(store
            .update_status(&paying.id, BookingStatus::Created, BookingStatus::AwaitingPayment)
            .await
            .unwrap());

        let sweeper = ExpirySweeper::new(store.clone(), bus);
        assert_eq!(sweeper.sweep_once(now).await.unwrap(), 1);

        for (id, expected) in [
            (&stale.id, BookingStatus::Cancelled),
            (&fresh.id, BookingStatus::Created),
            (&paying.id, BookingStatus::AwaitingPayment),
        ] {
            assert_eq!(store.read_by_id(id).await.unwrap().unwrap().status, expected);
        }

        let event = cancelled.try_next().expect("BookingCancelled published");
        assert_eq!(event.envelope().payload()["itemId"], "A");
        assert!(cancelled.try_next().is_none());

        // Second sweep finds nothing left to do.
        assert_eq!(sweeper.sweep_once(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_item_becomes_bookable_again() {
        let store = Arc::new(InMemoryBookingStore::new());
        store
            .create_exclusive(booking("T1", DateTime::<Utc>::UNIX_EPOCH))
            .await
            .unwrap();

        let sweeper = ExpirySweeper::new(store.clone(), Arc::new(InMemoryEventBus::new()));
        sweeper.sweep_once(Utc::now()).await.unwrap();

        store
            .create_exclusive(booking("T1", Utc::now()))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_runs_on_its_interval() {
        let store = Arc::new(InMemoryBookingStore::new());
        let stale = booking("T1", DateTime::<Utc>::UNIX_EPOCH);
        store.create_exclusive(stale.clone()).await.unwrap();

        let handle = ExpirySweeper::new(store.clone(), Arc::new(InMemoryEventBus::new()))
            .spawn(Duration::from_secs(30));
        assert_eq!(handle.name(), "expiry-sweeper");

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(
            store.read_by_id(&stale.id).await.unwrap().unwrap().status,
            BookingStatus::Cancelled
        );

        handle.shutdown().await;
    }
}
