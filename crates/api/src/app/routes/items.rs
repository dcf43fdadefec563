use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};

use boxoffice_core::ItemId;

use crate::app::dto::{ItemRequest, ItemResponse};
use crate::app::errors::ApiError;
use crate::app::services::CatalogServices;
use crate::context::UserContext;

/// Reads, open to anyone.
pub fn public_router() -> Router {
    Router::new()
        .route("/", get(list_items))
        .route("/:id", get(get_item))
}

/// Writes, behind the auth middleware.
pub fn protected_router() -> Router {
    Router::new()
        .route("/", post(create_item))
        .route("/:id", put(update_item))
}

pub async fn create_item(
    Extension(services): Extension<Arc<CatalogServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<ItemRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let price = body.price.ok_or_else(|| ApiError::bad_request("please specify a price"))?;

    let item = services.ledger.create_item(user.user_id(), &body.title, price).await?;
    Ok((StatusCode::CREATED, Json(ItemResponse::from(item))))
}

pub async fn list_items(
    Extension(services): Extension<Arc<CatalogServices>>,
) -> Result<Json<Vec<ItemResponse>>, ApiError> {
    let items = services.ledger.list_items().await?;
    Ok(Json(items.into_iter().map(ItemResponse::from).collect()))
}

pub async fn get_item(
    Extension(services): Extension<Arc<CatalogServices>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    let id = item_id(id)?;
    Ok(Json(services.ledger.get_item(&id).await?.into()))
}

pub async fn update_item(
    Extension(services): Extension<Arc<CatalogServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
    body: Result<Json<ItemRequest>, JsonRejection>,
) -> Result<Json<ItemResponse>, ApiError> {
    let id = item_id(id)?;
    let Json(body) = body?;
    let price = body.price.ok_or_else(|| ApiError::bad_request("please specify a price"))?;

    let item = services
        .ledger
        .update_item(user.user_id(), &id, &body.title, price)
        .await?;
    Ok(Json(item.into()))
}

fn item_id(raw: String) -> Result<ItemId, ApiError> {
    ItemId::parse(raw).map_err(|_| ApiError::bad_request("please specify a ticket id"))
}
