//! Item Replica: the reservation service's local, eventually-consistent copy
//! of catalog items.
//!
//! The replica is written only by applying `ItemCreated`/`ItemUpdated`
//! events. Delivery is at-least-once and unordered, so every write is a
//! version-guarded upsert: an event is taken when its version is at least the
//! stored one (ties tolerate redelivery) and dropped when it is older. An
//! update for an id never seen before inserts it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use boxoffice_catalog::{Item, ItemCreated, ItemUpdated};
use boxoffice_core::{ItemId, Price};
use boxoffice_events::{EventEnvelope, Projection, RawEnvelope, Subject};

use crate::store::{ItemRecord, ItemStore, StoreError, UpsertOutcome};
use crate::timeout::{DEFAULT_CALL_TIMEOUT, store_call};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    /// The event can never be applied (bad payload, missing id). Do not redeliver.
    #[error("malformed item event: {0}")]
    Malformed(String),

    #[error("item {0} not found in replica")]
    NotFound(ItemId),

    /// Transient; the event should be redelivered.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ItemReplica {
    store: Arc<dyn ItemStore>,
    timeout: Duration,
}

impl core::fmt::Debug for ItemReplica {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ItemReplica").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

impl ItemReplica {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Merge one item snapshot into the replica.
    #[instrument(skip(self, item), fields(item_id = %item.id, version = item.version))]
    pub async fn apply_item(&self, item: &Item) -> Result<UpsertOutcome, ReplicaError> {
        if item.id.is_blank() {
            return Err(ReplicaError::Malformed("item event without an id".into()));
        }
        Price::new(item.price.amount()).map_err(|e| ReplicaError::Malformed(e.to_string()))?;

        let outcome = store_call(
            self.timeout,
            self.store.upsert_if_newer(ItemRecord::replicated(item.clone())),
        )
        .await?;

        match outcome {
            UpsertOutcome::Stale => debug!("ignored stale item event"),
            _ => debug!(?outcome, "item replicated"),
        }
        Ok(outcome)
    }

    /// Decode and apply an envelope straight off the bus.
    pub async fn apply_raw(&self, envelope: &RawEnvelope) -> Result<UpsertOutcome, ReplicaError> {
        let item = match envelope.subject() {
            Subject::ItemCreated => envelope.decode::<ItemCreated>().map(|e| e.into_payload().item),
            Subject::ItemUpdated => envelope.decode::<ItemUpdated>().map(|e| e.into_payload().item),
            other => return Err(ReplicaError::Malformed(format!("unexpected subject {other}"))),
        }
        .map_err(|e| ReplicaError::Malformed(e.to_string()))?;

        self.apply_item(&item).await
    }

    pub async fn read(&self, id: &ItemId) -> Result<Item, ReplicaError> {
        store_call(self.timeout, self.store.read_by_id(id))
            .await?
            .map(|record| record.item)
            .ok_or_else(|| ReplicaError::NotFound(id.clone()))
    }
}

#[async_trait]
impl Projection<ItemCreated> for ItemReplica {
    type Outcome = UpsertOutcome;
    type Error = ReplicaError;

    async fn apply(&self, envelope: &EventEnvelope<ItemCreated>) -> Result<UpsertOutcome, ReplicaError> {
        self.apply_item(&envelope.payload().item).await
    }
}

#[async_trait]
impl Projection<ItemUpdated> for ItemReplica {
    type Outcome = UpsertOutcome;
    type Error = ReplicaError;

    async fn apply(&self, envelope: &EventEnvelope<ItemUpdated>) -> Result<UpsertOutcome, ReplicaError> {
        self.apply_item(&envelope.payload().item).await
    }
}
