use axum::{Router, routing::get};

pub mod bookings;
pub mod items;
pub mod system;

/// Authenticated reservation endpoints.
pub fn reservations_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/api/orders", bookings::router())
}

/// Authenticated catalog endpoints.
pub fn catalog_protected_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/api/tickets", items::protected_router())
}

/// Catalog endpoints open to anonymous callers.
pub fn catalog_public_router() -> Router {
    Router::new().nest("/api/tickets", items::public_router())
}
