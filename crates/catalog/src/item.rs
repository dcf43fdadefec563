use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxoffice_core::{Aggregate, AggregateRoot, DomainError, ItemId, Price, UserId};
use boxoffice_events::{Event, Subject};

/// An item as the rest of the system sees it.
///
/// This is the shape carried by `ItemCreated`/`ItemUpdated` and held by the
/// reservation service's replica. Ownership is catalog-internal and not part
/// of the contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub price: Price,
    pub version: u64,
}

/// Aggregate root: a catalog item together with the user who listed it.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    id: ItemId,
    owner: UserId,
    item: Option<Item>,
}

impl CatalogItem {
    /// A not-yet-created item bound to its future owner.
    pub fn empty(id: ItemId, owner: UserId) -> Self {
        Self { id, owner, item: None }
    }

    /// Rehydrate from a stored record.
    pub fn from_parts(item: Item, owner: UserId) -> Self {
        Self {
            id: item.id.clone(),
            owner,
            item: Some(item),
        }
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn item(&self) -> Option<&Item> {
        self.item.as_ref()
    }

    pub fn is_created(&self) -> bool {
        self.item.is_some()
    }
}

impl AggregateRoot for CatalogItem {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.item.as_ref().map_or(0, |item| item.version)
    }
}

/// Command: CreateItem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateItem {
    pub title: String,
    pub price: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateItem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateItem {
    pub requester: UserId,
    pub title: String,
    pub price: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogCommand {
    CreateItem(CreateItem),
    UpdateItem(UpdateItem),
}

/// Event: ItemCreated (published on `ticket:created`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCreated {
    pub item: Item,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemUpdated (published on `ticket:updated`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdated {
    pub item: Item,
    pub occurred_at: DateTime<Utc>,
}

impl Event for ItemCreated {
    fn subject(&self) -> Subject {
        Subject::ItemCreated
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Event for ItemUpdated {
    fn subject(&self) -> Subject {
        Subject::ItemUpdated
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    ItemCreated(ItemCreated),
    ItemUpdated(ItemUpdated),
}

impl CatalogEvent {
    pub fn item(&self) -> &Item {
        match self {
            CatalogEvent::ItemCreated(e) => &e.item,
            CatalogEvent::ItemUpdated(e) => &e.item,
        }
    }
}

impl Aggregate for CatalogItem {
    type Command = CatalogCommand;
    type Event = CatalogEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.item = Some(event.item().clone());
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CatalogCommand::CreateItem(cmd) => self.handle_create(cmd),
            CatalogCommand::UpdateItem(cmd) => self.handle_update(cmd),
        }
    }
}

fn validate_fields(title: &str, price: f64) -> Result<Price, DomainError> {
    if title.trim().is_empty() {
        return Err(DomainError::validation("please specify a title"));
    }
    Price::new(price)
}

impl CatalogItem {
    fn handle_create(&self, cmd: &CreateItem) -> Result<Vec<CatalogEvent>, DomainError> {
        if self.is_created() {
            return Err(DomainError::conflict("item already exists"));
        }
        let price = validate_fields(&cmd.title, cmd.price)?;

        Ok(vec![CatalogEvent::ItemCreated(ItemCreated {
            item: Item {
                id: self.id.clone(),
                title: cmd.title.clone(),
                price,
                version: 0,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateItem) -> Result<Vec<CatalogEvent>, DomainError> {
        let Some(current) = &self.item else {
            return Err(DomainError::not_found("item"));
        };
        if cmd.requester != self.owner {
            return Err(DomainError::Unauthorized);
        }
        let price = validate_fields(&cmd.title, cmd.price)?;

        Ok(vec![CatalogEvent::ItemUpdated(ItemUpdated {
            item: Item {
                id: self.id.clone(),
                title: cmd.title.clone(),
                price,
                version: current.version + 1,
            },
            occurred_at: cmd.occurred_at,
        })])
    }
}
