use axum::{Json, extract::Extension, http::StatusCode};

use crate::app::dto::WhoAmIResponse;
use crate::context::UserContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(user): Extension<UserContext>) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        id: user.user_id().to_string(),
        email: user.email().to_string(),
    })
}
