use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use boxoffice_api::app::services::{Backends, CatalogServices, ReservationServices};
use boxoffice_api::app::{build_catalog_app, build_reservations_app};
use boxoffice_auth::{Hs256Verifier, UserClaims};
use boxoffice_events::InMemoryEventBus;
use boxoffice_infra::{ServiceConfig, ServiceKind, WorkerHandle};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(app: axum::Router) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Catalog and reservation services wired to one in-process bus.
struct System {
    catalog: TestServer,
    reservations: TestServer,
    _workers: Vec<WorkerHandle>,
}

impl System {
    async fn start(booking_duration_secs: &str) -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let env = |kind| {
            ServiceConfig::from_lookup(kind, |var| match var {
                "JWT_SIGN_KEY" => Some(SECRET.to_string()),
                "BOOKING_DURATION_SECS" => Some(booking_duration_secs.to_string()),
                _ => None,
            })
            .expect("valid config")
        };

        let catalog_cfg = env(ServiceKind::Catalog);
        let catalog = CatalogServices::new(&Backends::in_memory_with_bus(bus.clone()), &catalog_cfg);

        let reservations_cfg = env(ServiceKind::Reservations);
        let (reservations, workers) =
            ReservationServices::start(&Backends::in_memory_with_bus(bus), &reservations_cfg)
                .await
                .expect("reservation services start");

        let verifier = || Arc::new(Hs256Verifier::new(SECRET));
        Self {
            catalog: TestServer::spawn(build_catalog_app(Arc::new(catalog), verifier())).await,
            reservations: TestServer::spawn(build_reservations_app(Arc::new(reservations), verifier())).await,
            _workers: workers,
        }
    }
}

fn mint_jwt(user_id: &str) -> String {
    let claims = UserClaims::new(user_id, format!("{user_id}@example.com"))
        .expiring_at(Utc::now() + ChronoDuration::minutes(10));

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn create_ticket(client: &reqwest::Client, sys: &System, owner: &str, title: &str, price: f64) -> Value {
    let res = client
        .post(sys.catalog.url("/api/tickets"))
        .bearer_auth(mint_jwt(owner))
        .json(&json!({ "title": title, "price": price }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

/// Book `ticket_id`, retrying while the reservation replica has not seen it yet.
async fn book_eventually(client: &reqwest::Client, sys: &System, user: &str, ticket_id: &str) -> reqwest::Response {
    for _ in 0..100 {
        let res = client
            .post(sys.reservations.url("/api/orders"))
            .header("auth-jwt", mint_jwt(user))
            .json(&json!({ "ticketId": ticket_id }))
            .send()
            .await
            .unwrap();

        if res.status() != StatusCode::NOT_FOUND {
            return res;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("ticket never reached the reservation replica");
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let sys = System::start("900").await;
    let client = reqwest::Client::new();

    let res = client.get(sys.reservations.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"][0], "User is not signed in");

    let res = client
        .get(sys.reservations.url("/api/orders"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(sys.catalog.url("/api/tickets"))
        .json(&json!({ "title": "t", "price": 1.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn identity_is_derived_from_token_in_any_credential_slot() {
    let sys = System::start("900").await;
    let client = reqwest::Client::new();
    let token = mint_jwt("u1");

    for req in [
        client.get(sys.reservations.url("/whoami")).bearer_auth(&token),
        client.get(sys.reservations.url("/whoami")).header("auth-jwt", &token),
        client
            .get(sys.reservations.url("/whoami"))
            .header("cookie", format!("auth-jwt={token}")),
    ] {
        let res = req.send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["id"], "u1");
        assert_eq!(body["email"], "u1@example.com");
    }
}

#[tokio::test]
async fn catalog_reads_are_public_and_writes_owner_only() {
    let sys = System::start("900").await;
    let client = reqwest::Client::new();

    let ticket = create_ticket(&client, &sys, "owner", "concert", 20.0).await;
    let id = ticket["id"].as_str().unwrap();
    assert_eq!(ticket["version"], 0);

    let res = client.get(sys.catalog.url("/api/tickets")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let all: Vec<Value> = res.json().await.unwrap();
    assert_eq!(all.len(), 1);

    let res = client
        .put(sys.catalog.url(&format!("/api/tickets/{id}")))
        .bearer_auth(mint_jwt("mallory"))
        .json(&json!({ "title": "mine now", "price": 0.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .put(sys.catalog.url(&format!("/api/tickets/{id}")))
        .bearer_auth(mint_jwt("owner"))
        .json(&json!({ "title": "concert", "price": -5.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"][0], "price cannot be less than 0");

    let res = client
        .put(sys.catalog.url(&format!("/api/tickets/{id}")))
        .bearer_auth(mint_jwt("owner"))
        .json(&json!({ "title": "concert (late)", "price": 25.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["version"], 1);

    let res = client.get(sys.catalog.url("/api/tickets/ghost")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn booking_lifecycle_create_conflict_get_cancel() {
    let sys = System::start("0").await;
    let client = reqwest::Client::new();

    let ticket = create_ticket(&client, &sys, "owner", "concert", 20.0).await;
    let ticket_id = ticket["id"].as_str().unwrap();

    // Book
    let res = book_eventually(&client, &sys, "u1", ticket_id).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let booking: Value = res.json().await.unwrap();
    let booking_id = booking["id"].as_str().unwrap().to_string();
    assert_eq!(booking["status"], "Created");
    assert_eq!(booking["expiresAt"], "1970-01-01T00:00:00Z");
    assert_eq!(booking["item"]["id"], ticket_id);
    assert_eq!(booking["item"]["price"], 20.0);

    // Second booking for the same ticket
    let res = client
        .post(sys.reservations.url("/api/orders/create"))
        .bearer_auth(mint_jwt("u2"))
        .json(&json!({ "itemId": ticket_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"][0], "ticket already reserved");

    // Someone else's booking
    let res = client
        .get(sys.reservations.url(&format!("/api/orders/{booking_id}")))
        .bearer_auth(mint_jwt("u2"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .patch(sys.reservations.url(&format!("/api/orders/{booking_id}")))
        .bearer_auth(mint_jwt("u2"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Owner cancels
    let res = client
        .patch(sys.reservations.url(&format!("/api/orders/{booking_id}")))
        .bearer_auth(mint_jwt("u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(sys.reservations.url(&format!("/api/orders/{booking_id}")))
        .bearer_auth(mint_jwt("u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let fetched: Value = res.json().await.unwrap();
    assert_eq!(fetched["status"], "Cancelled");

    // Cancelling again is an invalid transition
    let res = client
        .delete(sys.reservations.url(&format!("/api/orders/{booking_id}")))
        .bearer_auth(mint_jwt("u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // Listing
    let res = client
        .get(sys.reservations.url("/api/orders"))
        .bearer_auth(mint_jwt("u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let listed: Vec<Value> = res.json().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], booking_id.as_str());
}

#[tokio::test]
async fn malformed_and_unknown_requests() {
    let sys = System::start("900").await;
    let client = reqwest::Client::new();

    let res = client
        .post(sys.reservations.url("/api/orders"))
        .bearer_auth(mint_jwt("u1"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"][0], "Could not parse request");

    let res = client
        .post(sys.reservations.url("/api/orders"))
        .bearer_auth(mint_jwt("u1"))
        .json(&json!({ "itemId": "does-not-exist" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"][0], "could not find ticket: does-not-exist");

    let res = client
        .get(sys.reservations.url("/api/orders/nope"))
        .bearer_auth(mint_jwt("u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(sys.reservations.url("/api/orders"))
        .bearer_auth(mint_jwt("nobody"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let listed: Vec<Value> = res.json().await.unwrap();
    assert!(listed.is_empty());

    let res = client.get(sys.reservations.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
