//! Catalog (Item Ledger) domain module.
//!
//! Business rules for canonical item records, implemented as deterministic
//! domain logic (no IO, no HTTP, no storage). The catalog service persists
//! the results and publishes the change events this crate defines.

pub mod item;

pub use item::{
    CatalogCommand, CatalogEvent, CatalogItem, CreateItem, Item, ItemCreated, ItemUpdated, UpdateItem,
};
