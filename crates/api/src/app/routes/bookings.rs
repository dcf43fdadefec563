use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use boxoffice_core::{BookingId, ItemId};

use crate::app::dto::{BookingResponse, CreateBookingRequest};
use crate::app::errors::ApiError;
use crate::app::services::ReservationServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_booking).get(list_bookings))
        .route("/create", post(create_booking))
        .route("/:id", get(get_booking).patch(cancel_booking).delete(cancel_booking))
}

pub async fn create_booking(
    Extension(services): Extension<Arc<ReservationServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let item_id = ItemId::parse(body.item_id).map_err(|_| ApiError::bad_request("please specify a ticket id"))?;

    let view = services
        .engine
        .create_booking(user.user_id(), &item_id, services.booking_duration)
        .await?;

    Ok((StatusCode::CREATED, Json(BookingResponse::from(view))))
}

pub async fn list_bookings(
    Extension(services): Extension<Arc<ReservationServices>>,
    Extension(user): Extension<UserContext>,
) -> Result<Json<Vec<BookingResponse>>, ApiError> {
    let views = services.engine.list_bookings(user.user_id()).await?;
    Ok(Json(views.into_iter().map(BookingResponse::from).collect()))
}

pub async fn get_booking(
    Extension(services): Extension<Arc<ReservationServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, ApiError> {
    let id = booking_id(id)?;
    let view = services.engine.get_booking(&id, user.user_id()).await?;
    Ok(Json(view.into()))
}

pub async fn cancel_booking(
    Extension(services): Extension<Arc<ReservationServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = booking_id(id)?;
    services.engine.cancel_booking(&id, user.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn booking_id(raw: String) -> Result<BookingId, ApiError> {
    BookingId::parse(raw).map_err(|_| ApiError::bad_request("please specify an order id"))
}
