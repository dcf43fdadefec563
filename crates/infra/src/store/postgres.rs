//! Postgres-backed item and booking stores.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | unique violation on `bookings_one_active_per_item` | `23505` | `ActiveBookingExists` |
//! | other unique violation | `23505` | `Duplicate` |
//! | row decode failure | n/a | `Codec` |
//! | anything else | any | `Backend` |
//!
//! The single-active-booking rule is a partial unique index, so the check and
//! the insert are one statement and concurrent inserts race inside Postgres.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;

use boxoffice_catalog::Item;
use boxoffice_core::{BookingId, ExpectedVersion, ItemId, Price, UserId};
use boxoffice_reservations::{Booking, BookingStatus};

use super::{BookingFilter, BookingStore, ItemRecord, ItemStore, StoreError, UpsertOutcome};

const ACTIVE_BOOKING_INDEX: &str = "bookings_one_active_per_item";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        price DOUBLE PRECISION NOT NULL CHECK (price >= 0),
        version BIGINT NOT NULL,
        owner_id TEXT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bookings (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        item_id TEXT NOT NULL,
        status TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS bookings_one_active_per_item
        ON bookings (item_id)
        WHERE status IN ('Created', 'AwaitingPayment', 'Completed')
    "#,
    "CREATE INDEX IF NOT EXISTS bookings_user_id ON bookings (user_id)",
];

/// Create tables and indexes if they do not exist yet.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("bootstrap_schema", e))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PostgresItemStore {
    pool: Arc<PgPool>,
}

impl PostgresItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl ItemStore for PostgresItemStore {
    #[instrument(skip(self, record), fields(item_id = %record.item.id), err)]
    async fn create(&self, record: ItemRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO items (id, title, price, version, owner_id) VALUES ($1, $2, $3, $4, $5)")
            .bind(record.item.id.as_str())
            .bind(&record.item.title)
            .bind(record.item.price.amount())
            .bind(version_to_db(record.item.version)?)
            .bind(record.owner.as_ref().map(UserId::as_str))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_item", e))?;
        Ok(())
    }

    async fn read_by_id(&self, id: &ItemId) -> Result<Option<ItemRecord>, StoreError> {
        let row = sqlx::query("SELECT id, title, price, version, owner_id FROM items WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("read_item", e))?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError> {
        let rows = sqlx::query("SELECT id, title, price, version, owner_id FROM items ORDER BY id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    #[instrument(skip(self, record), fields(item_id = %record.item.id), err)]
    async fn update(&self, record: ItemRecord, expected: ExpectedVersion) -> Result<bool, StoreError> {
        let expected = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)?),
        };

        let result = sqlx::query(
            r#"
            UPDATE items
            SET title = $2, price = $3, version = $4
            WHERE id = $1 AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(record.item.id.as_str())
        .bind(&record.item.title)
        .bind(record.item.price.amount())
        .bind(version_to_db(record.item.version)?)
        .bind(expected)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_item", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, record), fields(item_id = %record.item.id, version = record.item.version), err)]
    async fn upsert_if_newer(&self, record: ItemRecord) -> Result<UpsertOutcome, StoreError> {
        // `xmax = 0` is true only for a freshly inserted row.
        let row = sqlx::query(
            r#"
            INSERT INTO items (id, title, price, version, owner_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
                SET title = EXCLUDED.title, price = EXCLUDED.price, version = EXCLUDED.version
                WHERE items.version <= EXCLUDED.version
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(record.item.id.as_str())
        .bind(&record.item.title)
        .bind(record.item.price.amount())
        .bind(version_to_db(record.item.version)?)
        .bind(record.owner.as_ref().map(UserId::as_str))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_item", e))?;

        match row {
            None => Ok(UpsertOutcome::Stale),
            Some(row) => {
                let inserted: bool = row.try_get("inserted").map_err(codec)?;
                Ok(if inserted {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Updated
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresBookingStore {
    pool: Arc<PgPool>,
}

impl PostgresBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl BookingStore for PostgresBookingStore {
    #[instrument(skip(self, booking), fields(booking_id = %booking.id, item_id = %booking.item_id), err)]
    async fn create_exclusive(&self, booking: Booking) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO bookings (id, user_id, item_id, status, expires_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(booking.id.as_str())
        .bind(booking.user_id.as_str())
        .bind(booking.item_id.as_str())
        .bind(booking.status.as_str())
        .bind(booking.expires_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if violates(&e, ACTIVE_BOOKING_INDEX) => Err(StoreError::ActiveBookingExists(booking.item_id)),
            Err(e) => Err(map_sqlx_error("create_booking", e)),
        }
    }

    async fn read_by_id(&self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query("SELECT id, user_id, item_id, status, expires_at FROM bookings WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("read_booking", e))?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn search(&self, filter: BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id, user_id, item_id, status, expires_at FROM bookings WHERE TRUE");

        if !filter.item_ids.is_empty() {
            let ids: Vec<String> = filter.item_ids.into_iter().map(String::from).collect();
            qb.push(" AND item_id = ANY(").push_bind(ids).push(")");
        }
        if !filter.user_ids.is_empty() {
            let ids: Vec<String> = filter.user_ids.into_iter().map(String::from).collect();
            qb.push(" AND user_id = ANY(").push_bind(ids).push(")");
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
            qb.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(cutoff) = filter.expired_by {
            qb.push(" AND expires_at <= ").push_bind(cutoff);
        }
        qb.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("search_bookings", e))?;

        rows.iter().map(booking_from_row).collect()
    }

    #[instrument(skip(self), fields(booking_id = %id), err)]
    async fn update_status(&self, id: &BookingId, from: BookingStatus, to: BookingStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE bookings SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id.as_str())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_booking_status", e))?;

        Ok(result.rows_affected() == 1)
    }
}

fn item_from_row(row: &PgRow) -> Result<ItemRecord, StoreError> {
    let id: String = row.try_get("id").map_err(codec)?;
    let title: String = row.try_get("title").map_err(codec)?;
    let price: f64 = row.try_get("price").map_err(codec)?;
    let version: i64 = row.try_get("version").map_err(codec)?;
    let owner: Option<String> = row.try_get("owner_id").map_err(codec)?;

    Ok(ItemRecord {
        item: Item {
            id: ItemId::parse(id).map_err(codec)?,
            title,
            price: Price::new(price).map_err(codec)?,
            version: u64::try_from(version).map_err(codec)?,
        },
        owner: owner.map(UserId::parse).transpose().map_err(codec)?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, StoreError> {
    let id: String = row.try_get("id").map_err(codec)?;
    let user_id: String = row.try_get("user_id").map_err(codec)?;
    let item_id: String = row.try_get("item_id").map_err(codec)?;
    let status: String = row.try_get("status").map_err(codec)?;
    let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(codec)?;

    Ok(Booking {
        id: BookingId::parse(id).map_err(codec)?,
        user_id: UserId::parse(user_id).map_err(codec)?,
        item_id: ItemId::parse(item_id).map_err(codec)?,
        status: BookingStatus::parse(&status).ok_or_else(|| StoreError::Codec(format!("unknown status {status}")))?,
        expires_at,
    })
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(codec)
}

fn codec(err: impl core::fmt::Display) -> StoreError {
    StoreError::Codec(err.to_string())
}

fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Codec(format!("{operation}: {err}")),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
