//! Reservation Engine: booking creation, lookup, listing and cancellation.
//!
//! The engine holds no locks of its own. The single-active-booking rule is
//! enforced by [`BookingStore::create_exclusive`]; the search that precedes it
//! is only a fast path for the common "already taken" case.
//!
//! Publishing happens after the write is durable. If the publish fails the
//! booking stays persisted without its event (there is no outbox); the gap is
//! logged at error level and the caller sees `Internal`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use boxoffice_catalog::Item;
use boxoffice_core::{BookingId, ItemId, UserId};
use boxoffice_events::{Event, EventBus};
use boxoffice_reservations::{
    Booking, BookingCancelled, BookingCreated, BookingStatus, ItemSnapshot, expires_at_for,
};

use crate::error::{ReservationError, ServiceError};
use crate::publish::publish_event;
use crate::replica::{ItemReplica, ReplicaError};
use crate::store::{BookingFilter, BookingStore, StoreError};
use crate::timeout::{DEFAULT_CALL_TIMEOUT, store_call};

/// Upper bound on bookings returned by a listing.
pub const LIST_LIMIT: usize = 50;

const ALREADY_RESERVED: &str = "ticket already reserved";

/// A booking joined with the item it references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingView {
    pub booking: Booking,
    pub item: Item,
}

#[derive(Clone)]
pub struct ReservationEngine {
    replica: ItemReplica,
    bookings: Arc<dyn BookingStore>,
    bus: Arc<dyn EventBus>,
    timeout: Duration,
}

impl core::fmt::Debug for ReservationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReservationEngine")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ReservationEngine {
    pub fn new(replica: ItemReplica, bookings: Arc<dyn BookingStore>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            replica,
            bookings,
            bus,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound every store/bus call made on behalf of a request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.replica = self.replica.with_timeout(timeout);
        self.timeout = timeout;
        self
    }

    pub fn replica(&self) -> &ItemReplica {
        &self.replica
    }

    #[instrument(skip(self), fields(user_id = %user_id, item_id = %item_id))]
    pub async fn create_booking(
        &self,
        user_id: &UserId,
        item_id: &ItemId,
        duration: Duration,
    ) -> Result<BookingView, ReservationError> {
        let item = self.replica.read(item_id).await.map_err(|e| match e {
            ReplicaError::NotFound(id) => ServiceError::NotFound(format!("could not find ticket: {id}")),
            other => ServiceError::Internal(other.to_string()),
        })?;

        let active = store_call(
            self.timeout,
            self.bookings.search(BookingFilter::active_for_item(item_id.clone())),
        )
        .await?;
        if !active.is_empty() {
            return Err(ServiceError::Conflict(ALREADY_RESERVED.into()));
        }

        let booking = Booking::new(
            BookingId::generate(),
            user_id.clone(),
            item_id.clone(),
            expires_at_for(Utc::now(), duration),
        );

        match store_call(self.timeout, self.bookings.create_exclusive(booking.clone())).await {
            Ok(()) => {}
            Err(StoreError::ActiveBookingExists(_)) => {
                info!("lost booking race for item");
                return Err(ServiceError::Conflict(ALREADY_RESERVED.into()));
            }
            Err(e) => return Err(e.into()),
        }
        info!(booking_id = %booking.id, "booking created");

        let event = BookingCreated {
            booking: booking.clone(),
            item: ItemSnapshot {
                id: item.id.clone(),
                price: item.price,
            },
            occurred_at: Utc::now(),
        };
        self.publish_persisted(&booking.id, event).await?;

        Ok(BookingView { booking, item })
    }

    pub async fn get_booking(&self, id: &BookingId, user_id: &UserId) -> Result<BookingView, ReservationError> {
        let booking = self.owned_booking(id, user_id).await?;
        let item = self.replica.read(&booking.item_id).await.map_err(|e| {
            ServiceError::Internal(format!("item {} for booking {id} unreadable: {e}", booking.item_id))
        })?;
        Ok(BookingView { booking, item })
    }

    /// The caller's bookings, newest first. Bookings whose item cannot be
    /// read are skipped.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_bookings(&self, user_id: &UserId) -> Result<Vec<BookingView>, ReservationError> {
        let bookings = store_call(
            self.timeout,
            self.bookings.search(BookingFilter::for_user(user_id.clone(), LIST_LIMIT)),
        )
        .await?;

        let mut views = Vec::with_capacity(bookings.len());
        for booking in bookings {
            match self.replica.read(&booking.item_id).await {
                Ok(item) => views.push(BookingView { booking, item }),
                Err(e) => warn!(
                    booking_id = %booking.id,
                    item_id = %booking.item_id,
                    error = %e,
                    "skipping booking whose item could not be read"
                ),
            }
        }
        Ok(views)
    }

    #[instrument(skip(self), fields(booking_id = %id, user_id = %user_id))]
    pub async fn cancel_booking(&self, id: &BookingId, user_id: &UserId) -> Result<Booking, ReservationError> {
        let mut booking = self.owned_booking(id, user_id).await?;
        let from = booking.cancel()?;

        let swapped = store_call(
            self.timeout,
            self.bookings.update_status(id, from, BookingStatus::Cancelled),
        )
        .await?;
        if !swapped {
            return Err(ServiceError::Conflict("booking was modified concurrently".into()));
        }
        info!(%from, "booking cancelled");

        let event = BookingCancelled {
            item_id: booking.item_id.clone(),
            booking: booking.clone(),
            occurred_at: Utc::now(),
        };
        self.publish_persisted(id, event).await?;

        Ok(booking)
    }

    async fn owned_booking(&self, id: &BookingId, user_id: &UserId) -> Result<Booking, ReservationError> {
        let booking = store_call(self.timeout, self.bookings.read_by_id(id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("order not found".into()))?;

        if !booking.is_owned_by(user_id) {
            return Err(ServiceError::Unauthorized);
        }
        Ok(booking)
    }

    async fn publish_persisted<E: Event>(&self, booking_id: &BookingId, event: E) -> Result<(), ReservationError> {
        let subject = event.subject();
        publish_event(self.bus.as_ref(), self.timeout, event)
            .await
            .map(|_| ())
            .map_err(|e| {
                error!(%booking_id, %subject, error = %e, "booking persisted but event not published");
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_events::{InMemoryEventBus, Subject, Subscription};

    use crate::store::{InMemoryBookingStore, InMemoryItemStore};
    use crate::test_support::{FailingBus, SlowBookingStore, item};

    struct Fixture {
        engine: ReservationEngine,
        bookings: Arc<InMemoryBookingStore>,
        created: Subscription,
        cancelled: Subscription,
    }

    async fn fixture(items: &[&str]) -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let created = bus.subscribe_queue_group(Subject::BookingCreated, "payments").await.unwrap();
        let cancelled = bus.subscribe_queue_group(Subject::BookingCancelled, "payments").await.unwrap();

        let replica = ItemReplica::new(Arc::new(InMemoryItemStore::new()));
        for id in items {
            replica.apply_item(&item(id, 0)).await.unwrap();
        }
        let bookings = Arc::new(InMemoryBookingStore::new());
        let engine = ReservationEngine::new(replica, bookings.clone(), bus);

        Fixture {
            engine,
            bookings,
            created,
            cancelled,
        }
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn item_id(id: &str) -> ItemId {
        ItemId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn zero_duration_books_with_epoch_expiry_and_second_request_conflicts() {
        let mut fx = fixture(&["T1"]).await;

        let view = fx
            .engine
            .create_booking(&user("u1"), &item_id("T1"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(view.booking.status, BookingStatus::Created);
        assert_eq!(view.booking.expires_at.timestamp(), 0);
        assert_eq!(view.item.id, item_id("T1"));

        let err = fx
            .engine
            .create_booking(&user("u2"), &item_id("T1"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Conflict("ticket already reserved".into()));

        let published = fx.created.try_next().expect("BookingCreated published");
        assert_eq!(published.envelope().payload()["booking"]["id"], view.booking.id.as_str());
        assert_eq!(published.envelope().payload()["item"]["price"], 20.0);
        assert!(fx.created.try_next().is_none());
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let fx = fixture(&[]).await;
        let err = fx
            .engine
            .create_booking(&user("u1"), &item_id("ghost"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("could not find ticket: ghost".into()));
    }

    #[tokio::test]
    async fn only_the_owner_may_cancel() {
        let mut fx = fixture(&["T1"]).await;
        let view = fx
            .engine
            .create_booking(&user("u1"), &item_id("T1"), Duration::from_secs(60))
            .await
            .unwrap();
        let id = view.booking.id;

        assert_eq!(fx.engine.cancel_booking(&id, &user("u2")).await, Err(ServiceError::Unauthorized));

        fx.engine.cancel_booking(&id, &user("u1")).await.unwrap();
        let after = fx.engine.get_booking(&id, &user("u1")).await.unwrap();
        assert_eq!(after.booking.status, BookingStatus::Cancelled);

        let event = fx.cancelled.try_next().expect("BookingCancelled published");
        assert_eq!(event.envelope().payload()["itemId"], "T1");
    }

    #[tokio::test]
    async fn cancelling_twice_is_an_invalid_transition() {
        let fx = fixture(&["T1"]).await;
        let id = fx
            .engine
            .create_booking(&user("u1"), &item_id("T1"), Duration::from_secs(60))
            .await
            .unwrap()
            .booking
            .id;

        fx.engine.cancel_booking(&id, &user("u1")).await.unwrap();
        let err = fx.engine.cancel_booking(&id, &user("u1")).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::InvalidTransition {
                from: "Cancelled".into(),
                to: "Cancelled".into()
            }
        );
    }

    #[tokio::test]
    async fn cancelled_item_can_be_booked_again() {
        let fx = fixture(&["T1"]).await;
        let first = fx
            .engine
            .create_booking(&user("u1"), &item_id("T1"), Duration::from_secs(60))
            .await
            .unwrap();
        fx.engine.cancel_booking(&first.booking.id, &user("u1")).await.unwrap();

        fx.engine
            .create_booking(&user("u2"), &item_id("T1"), Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn foreign_booking_is_unauthorized_in_every_status() {
        let fx = fixture(&["T1", "T2"]).await;
        let book = |item: &'static str| {
            let engine = fx.engine.clone();
            async move {
                engine
                    .create_booking(&user("u1"), &item_id(item), Duration::from_secs(60))
                    .await
                    .unwrap()
                    .booking
                    .id
            }
        };
        let assert_foreign = |id: BookingId| {
            let engine = fx.engine.clone();
            async move {
                assert_eq!(engine.get_booking(&id, &user("u2")).await, Err(ServiceError::Unauthorized));
                assert_eq!(engine.cancel_booking(&id, &user("u2")).await, Err(ServiceError::Unauthorized));
            }
        };

        let id = book("T1").await;
        assert_foreign(id.clone()).await;

        for to in [BookingStatus::AwaitingPayment, BookingStatus::Completed] {
            let from = fx.bookings.read_by_id(&id).await.unwrap().unwrap().status;
            assert!(fx.bookings.update_status(&id, from, to).await.unwrap());
            assert_foreign(id.clone()).await;
        }

        let cancelled = book("T2").await;
        fx.engine.cancel_booking(&cancelled, &user("u1")).await.unwrap();
        assert_foreign(cancelled.clone()).await;

        let seen = fx.engine.get_booking(&cancelled, &user("u1")).await.unwrap();
        assert_eq!(seen.booking.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn missing_booking_is_not_found() {
        let fx = fixture(&[]).await;
        let err = fx
            .engine
            .get_booking(&BookingId::parse("nope").unwrap(), &user("u1"))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("order not found".into()));
    }

    #[tokio::test]
    async fn listing_skips_bookings_whose_item_is_missing() {
        let fx = fixture(&["T1", "T2"]).await;
        fx.engine
            .create_booking(&user("u1"), &item_id("T1"), Duration::from_secs(60))
            .await
            .unwrap();
        fx.engine
            .create_booking(&user("u1"), &item_id("T2"), Duration::from_secs(60))
            .await
            .unwrap();
        fx.engine
            .create_booking(&user("u2"), &item_id("T2"), Duration::from_secs(60))
            .await
            .unwrap_err();

        // A booking for an item the replica has never seen.
        fx.bookings
            .create_exclusive(Booking::new(
                BookingId::generate(),
                user("u1"),
                item_id("orphan"),
                Utc::now(),
            ))
            .await
            .unwrap();

        let views = fx.engine.list_bookings(&user("u1")).await.unwrap();
        let items: Vec<_> = views.iter().map(|v| v.item.id.as_str()).collect();
        assert_eq!(items, vec!["T2", "T1"]);
        assert!(fx.engine.list_bookings(&user("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_requests_yield_exactly_one_booking() {
        let fx = fixture(&["HOT"]).await;
        let engine = Arc::new(fx.engine);

        let mut tasks = Vec::new();
        for n in 0..32 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .create_booking(&user(&format!("u{n}")), &item_id("HOT"), Duration::from_secs(60))
                    .await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ServiceError::Conflict(msg)) => {
                    assert_eq!(msg, "ticket already reserved");
                    conflicts += 1;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 31);

        let active = fx
            .bookings
            .search(BookingFilter::active_for_item(item_id("HOT")))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_booking_store_surfaces_as_internal() {
        let replica = ItemReplica::new(Arc::new(InMemoryItemStore::new()));
        replica.apply_item(&item("T1", 0)).await.unwrap();
        let engine = ReservationEngine::new(
            replica,
            Arc::new(SlowBookingStore(Duration::from_secs(60))),
            Arc::new(InMemoryEventBus::new()),
        )
        .with_timeout(Duration::from_millis(100));

        let err = engine
            .create_booking(&user("u1"), &item_id("T1"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[tokio::test]
    async fn publish_failure_keeps_the_booking_and_reports_internal() {
        let replica = ItemReplica::new(Arc::new(InMemoryItemStore::new()));
        replica.apply_item(&item("T1", 0)).await.unwrap();
        let bookings = Arc::new(InMemoryBookingStore::new());
        let engine = ReservationEngine::new(replica, bookings.clone(), Arc::new(FailingBus));

        let err = engine
            .create_booking(&user("u1"), &item_id("T1"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));

        let persisted = bookings.search(BookingFilter::active_for_item(item_id("T1"))).await.unwrap();
        assert_eq!(persisted.len(), 1);
    }
}
