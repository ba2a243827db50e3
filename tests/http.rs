use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use rideasy::{
    config::AppConfig,
    db::{init_pool, run_migrations},
    routes::create_router,
    services::notifier::NotificationRegistry,
    state::AppState,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    _root: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let root = TempDir::new().expect("temp dir");
        let database_url = format!(
            "sqlite://{}",
            root.path().join("http.sqlite").to_string_lossy()
        );
        let config = AppConfig {
            database_url,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            session_ttl: chrono::Duration::hours(1),
            match_sweep_interval: None,
        };
        let db = init_pool(&config.database_url).await.expect("pool");
        run_migrations(&db).await.expect("migrations");
        let state = AppState::new(config, db, NotificationRegistry::new());
        Self {
            router: create_router(state),
            _root: root,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    async fn register(&self, name: &str, mode: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "email": format!("{name}@rideasy.test"),
                    "username": name,
                    "password": "secret-password",
                    "user_mode": mode,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["token_type"], "bearer");
        body["access_token"]
            .as_str()
            .expect("access token")
            .to_string()
    }
}

fn ride_request() -> Value {
    json!({
        "pickup_location": { "name": "Office", "latitude": 0.0, "longitude": 0.0 },
        "destination_location": { "name": "Home", "latitude": 0.0, "longitude": 1.0 },
    })
}

#[tokio::test]
async fn health_reports_registry_stats() {
    let app = TestApp::new().await;
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let app = TestApp::new().await;
    app.register("alice", "rider").await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "email": "alice@rideasy.test",
                "username": "alice2",
                "password": "secret-password",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Email already registered");
}

#[tokio::test]
async fn login_and_me() {
    let app = TestApp::new().await;
    app.register("alice", "rider").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "alice@rideasy.test", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "ALICE@rideasy.test", "password": "secret-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["access_token"].as_str().expect("token").to_string();

    let (status, body) = app.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");

    let (status, _) = app
        .call(Method::POST, "/api/auth/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rides_require_a_token() {
    let app = TestApp::new().await;
    let (status, body) = app.call(Method::GET, "/api/rides", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = app
        .call(Method::GET, "/api/rides", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ride_request_flow() {
    let app = TestApp::new().await;
    let alice = app.register("alice", "rider").await;
    let bob = app.register("bob", "driver").await;
    let mallory = app.register("mallory", "rider").await;

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/users/driver/availability",
            Some(&bob),
            Some(json!({ "is_online": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, ride) = app
        .call(Method::POST, "/api/rides", Some(&alice), Some(ride_request()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{ride}");
    assert_eq!(ride["status"], "matched");
    assert_eq!(ride["fare"], 169.29);
    assert_eq!(ride["driver_name"], "bob");
    let ride_id = ride["id"].as_str().expect("ride id").to_string();

    let (status, body) = app
        .call(Method::POST, "/api/rides", Some(&alice), Some(ride_request()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "conflict");

    let uri = format!("/api/rides/{ride_id}");
    let (status, _) = app.call(Method::GET, &uri, Some(&mallory), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::POST, &format!("{uri}/arrive"), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "driverArriving");

    let (status, body) = app
        .call(Method::GET, "/api/rides?status=driverArriving", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn invalid_coordinates_are_unprocessable() {
    let app = TestApp::new().await;
    let alice = app.register("alice", "rider").await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/rides",
            Some(&alice),
            Some(json!({
                "pickup_location": { "name": "Nowhere", "latitude": 91.0, "longitude": 0.0 },
                "destination_location": { "name": "Home", "latitude": 0.0, "longitude": 1.0 },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn unknown_ride_is_not_found() {
    let app = TestApp::new().await;
    let alice = app.register("alice", "rider").await;
    let (status, body) = app
        .call(Method::GET, "/api/rides/does-not-exist", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Ride not found");
}
