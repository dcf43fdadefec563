//! Item Ledger: the catalog service's canonical item records.
//!
//! Decisions are made by the [`CatalogItem`] aggregate; this service loads it,
//! persists the resulting item with a version-guarded write and publishes the
//! change event.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument};

use boxoffice_catalog::{CatalogCommand, CatalogEvent, CatalogItem, CreateItem, Item, UpdateItem};
use boxoffice_core::{Aggregate, ExpectedVersion, ItemId, UserId};
use boxoffice_events::EventBus;

use crate::error::{CatalogError, ServiceError};
use crate::publish::publish_event;
use crate::store::{ItemRecord, ItemStore, StoreError};
use crate::timeout::{DEFAULT_CALL_TIMEOUT, store_call};

#[derive(Clone)]
pub struct ItemLedger {
    items: Arc<dyn ItemStore>,
    bus: Arc<dyn EventBus>,
    timeout: Duration,
}

impl core::fmt::Debug for ItemLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ItemLedger")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ItemLedger {
    pub fn new(items: Arc<dyn ItemStore>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            items,
            bus,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(skip(self, title), fields(owner = %owner))]
    pub async fn create_item(&self, owner: &UserId, title: &str, price: f64) -> Result<Item, CatalogError> {
        let mut aggregate = CatalogItem::empty(ItemId::generate(), owner.clone());
        let events = aggregate.handle(&CatalogCommand::CreateItem(CreateItem {
            title: title.to_owned(),
            price,
            occurred_at: Utc::now(),
        }))?;

        for event in &events {
            aggregate.apply(event);
        }
        let item = current_item(&aggregate)?;

        store_call(self.timeout, self.items.create(ItemRecord::owned(item.clone(), owner.clone()))).await?;
        info!(item_id = %item.id, "item created");

        self.publish_all(events).await?;
        Ok(item)
    }

    #[instrument(skip(self, title), fields(item_id = %id, requester = %requester))]
    pub async fn update_item(
        &self,
        requester: &UserId,
        id: &ItemId,
        title: &str,
        price: f64,
    ) -> Result<Item, CatalogError> {
        let mut aggregate = self.load(id).await?;
        let expected = ExpectedVersion::Exact(aggregate.item().map_or(0, |i| i.version));

        let events = aggregate.handle(&CatalogCommand::UpdateItem(UpdateItem {
            requester: requester.clone(),
            title: title.to_owned(),
            price,
            occurred_at: Utc::now(),
        }))?;
        for event in &events {
            aggregate.apply(event);
        }
        let item = current_item(&aggregate)?;

        let record = ItemRecord::owned(item.clone(), aggregate.owner().clone());
        if !store_call(self.timeout, self.items.update(record, expected)).await? {
            return Err(ServiceError::Conflict("item was modified concurrently".into()));
        }
        info!(version = item.version, "item updated");

        self.publish_all(events).await?;
        Ok(item)
    }

    pub async fn get_item(&self, id: &ItemId) -> Result<Item, CatalogError> {
        let record = store_call(self.timeout, self.items.read_by_id(id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("item not found".into()))?;
        Ok(record.item)
    }

    pub async fn list_items(&self) -> Result<Vec<Item>, CatalogError> {
        let records = store_call(self.timeout, self.items.list()).await?;
        Ok(records.into_iter().map(|r| r.item).collect())
    }

    async fn load(&self, id: &ItemId) -> Result<CatalogItem, CatalogError> {
        match store_call(self.timeout, self.items.read_by_id(id)).await? {
            Some(ItemRecord { item, owner: Some(owner) }) => Ok(CatalogItem::from_parts(item, owner)),
            Some(ItemRecord { owner: None, .. }) => Err(StoreError::Codec(format!("item {id} has no owner")).into()),
            None => Err(ServiceError::NotFound("item not found".into())),
        }
    }

    async fn publish_all(&self, events: Vec<CatalogEvent>) -> Result<(), CatalogError> {
        for event in events {
            let item_id = event.item().id.clone();
            let published = match event {
                CatalogEvent::ItemCreated(e) => publish_event(self.bus.as_ref(), self.timeout, e).await,
                CatalogEvent::ItemUpdated(e) => publish_event(self.bus.as_ref(), self.timeout, e).await,
            };
            if let Err(e) = published {
                error!(%item_id, error = %e, "item persisted but event not published");
                return Err(e);
            }
        }
        Ok(())
    }
}

fn current_item(aggregate: &CatalogItem) -> Result<Item, CatalogError> {
    aggregate
        .item()
        .cloned()
        .ok_or_else(|| ServiceError::Internal("aggregate produced no item".into()))
}
