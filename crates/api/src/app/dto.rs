use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxoffice_catalog::Item;
use boxoffice_infra::BookingView;
use boxoffice_reservations::{Booking, BookingStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    #[serde(alias = "ticketId")]
    pub item_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ItemRequest {
    #[serde(default)]
    pub title: String,
    pub price: Option<f64>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResponse {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub version: u64,
}

impl From<Item> for ItemResponse {
    fn from(item: Item) -> Self {
        Self {
            id: item.id.to_string(),
            title: item.title,
            price: item.price.amount(),
            version: item.version,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub id: String,
    pub user_id: String,
    pub status: BookingStatus,
    pub expires_at: DateTime<Utc>,
    pub item: ItemResponse,
}

impl From<BookingView> for BookingResponse {
    fn from(view: BookingView) -> Self {
        let BookingView { booking, item } = view;
        let Booking {
            id,
            user_id,
            status,
            expires_at,
            ..
        } = booking;
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            status,
            expires_at,
            item: item.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmIResponse {
    pub id: String,
    pub email: String,
}
