//! Catalog listener: feeds item events from the bus into the [`ItemReplica`].
//!
//! Settlement policy per delivery:
//!
//! | outcome | settlement |
//! |---------|------------|
//! | applied or stale | ack |
//! | malformed (undecodable, missing id, negative price) | ack, logged and dropped |
//! | store failure or timeout | nack, redelivered by the bus |

use std::sync::Arc;

use tracing::{error, info, warn};

use boxoffice_events::{BusError, Delivery, EventBus, Subject, Subscription};

use crate::replica::{ItemReplica, ReplicaError};
use crate::worker::{WorkerHandle, shutdown_requested};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Nacked,
}

#[derive(Debug)]
pub struct CatalogListener;

impl CatalogListener {
    /// Join `group` on both item subjects and start consuming.
    pub async fn spawn(bus: Arc<dyn EventBus>, replica: ItemReplica, group: &str) -> Result<WorkerHandle, BusError> {
        let created = bus.subscribe_queue_group(Subject::ItemCreated, group).await?;
        let updated = bus.subscribe_queue_group(Subject::ItemUpdated, group).await?;
        info!(group, "catalog listener subscribed");

        let mut feed = ItemFeed::new(created, updated);
        Ok(WorkerHandle::spawn("catalog-listener", move |mut shutdown| async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    d = feed.next() => d,
                };

                let Some(delivery) = next else {
                    warn!("item subscription closed; catalog listener exiting");
                    break;
                };
                handle_delivery(&replica, delivery).await;
            }
        }))
    }
}

/// Both item subscriptions, polled in alternating order so a backlog on one
/// subject cannot starve the other.
struct ItemFeed {
    created: Subscription,
    updated: Subscription,
    updated_first: bool,
}

impl ItemFeed {
    fn new(created: Subscription, updated: Subscription) -> Self {
        Self {
            created,
            updated,
            updated_first: false,
        }
    }

    /// Next delivery from either subject; `None` once either subscription closes.
    async fn next(&mut self) -> Option<Delivery> {
        let Self {
            created,
            updated,
            updated_first,
        } = self;

        let next = if *updated_first {
            tokio::select! {
                biased;
                d = updated.next() => d,
                d = created.next() => d,
            }
        } else {
            tokio::select! {
                biased;
                d = created.next() => d,
                d = updated.next() => d,
            }
        };
        *updated_first = !*updated_first;
        next
    }
}

pub(crate) async fn handle_delivery(replica: &ItemReplica, delivery: Delivery) -> Settlement {
    let event_id = delivery.envelope().event_id();
    let subject = delivery.subject();
    let attempt = delivery.attempt();

    let settlement = match replica.apply_raw(delivery.envelope()).await {
        Ok(_) => Settlement::Acked,
        Err(ReplicaError::Malformed(reason)) => {
            warn!(%event_id, %subject, %reason, "dropping malformed item event");
            Settlement::Acked
        }
        Err(e) => {
            error!(%event_id, %subject, attempt, error = %e, "failed to apply item event; leaving for redelivery");
            Settlement::Nacked
        }
    };

    let settled = match settlement {
        Settlement::Acked => delivery.ack().await,
        Settlement::Nacked => delivery.nack().await,
    };
    if let Err(e) = settled {
        warn!(%event_id, %subject, error = %e, "failed to settle delivery");
    }
    settlement
}
