use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use rideasy::{
    auth::{self, RegisterRequest},
    config::AppConfig,
    db::{init_pool, run_migrations},
    models::{
        location::NewLocation,
        ride::CreateRideRequest,
        user::{User, UserMode},
    },
    routes::create_router,
    services::notifier::NotificationRegistry,
    state::AppState,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::frame::coding::CloseCode, Message},
    MaybeTlsStream, WebSocketStream,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct LiveServer {
    state: AppState,
    addr: SocketAddr,
    _root: TempDir,
}

impl LiveServer {
    async fn start() -> Self {
        let root = TempDir::new().expect("temp dir");
        let database_url = format!(
            "sqlite://{}",
            root.path().join("ws.sqlite").to_string_lossy()
        );
        let config = AppConfig {
            database_url,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            session_ttl: chrono::Duration::hours(1),
            match_sweep_interval: None,
        };
        let db = init_pool(&config.database_url).await.expect("pool");
        run_migrations(&db).await.expect("migrations");
        let state = AppState::new(config.clone(), db, NotificationRegistry::new());

        let listener = TcpListener::bind(config.listen_addr).await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .expect("serve");
        });

        Self {
            state,
            addr,
            _root: root,
        }
    }

    async fn rider_with_token(&self, name: &str) -> (User, String) {
        let user = auth::register_user(
            &self.state,
            RegisterRequest {
                email: format!("{name}@rideasy.test"),
                username: name.to_string(),
                password: "secret-password".into(),
                full_name: None,
                phone_number: None,
                user_mode: UserMode::Rider,
            },
        )
        .await
        .expect("register");
        let token = auth::create_session(&self.state, &user.id)
            .await
            .expect("session");
        (user, token)
    }

    async fn connect(&self, query: &str) -> Client {
        let url = format!("ws://{}/ws/ride-updates{query}", self.addr);
        let (client, _) = connect_async(url).await.expect("websocket handshake");
        client
    }
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(WAIT, client.next())
        .await
        .expect("message before timeout")
        .expect("stream still open")
        .expect("valid frame")
}

async fn next_json(client: &mut Client) -> Value {
    match next_message(client).await {
        Message::Text(text) => serde_json::from_str(&text).expect("json frame"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn expect_policy_close(client: &mut Client) {
    match next_message(client).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected policy close, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_token_is_closed_with_policy_violation() {
    let server = LiveServer::start().await;
    let mut client = server.connect("").await;
    expect_policy_close(&mut client).await;
}

#[tokio::test]
async fn unknown_token_is_closed_with_policy_violation() {
    let server = LiveServer::start().await;
    let mut client = server.connect("?token=not-a-session").await;
    expect_policy_close(&mut client).await;
    assert_eq!(server.state.registry.stats().await.connections, 0);
}

#[tokio::test]
async fn session_acknowledges_answers_and_receives_ride_updates() {
    let server = LiveServer::start().await;
    let (rider, token) = server.rider_with_token("wsr").await;
    let mut client = server.connect(&format!("?token={token}")).await;

    let hello = next_json(&mut client).await;
    assert_eq!(hello["type"], "connected");
    assert_eq!(hello["message"], "Connected as wsr");
    assert_eq!(server.state.registry.connection_count(&rider.id).await, 1);

    client
        .send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .expect("send ping");
    assert_eq!(next_json(&mut client).await["type"], "pong");

    client
        .send(Message::Text("definitely not json".into()))
        .await
        .expect("send garbage");
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["message"], "Invalid JSON format");

    let ride = server
        .state
        .rides
        .create_ride(
            &rider,
            CreateRideRequest {
                pickup_location: NewLocation {
                    name: "Office".into(),
                    latitude: 0.0,
                    longitude: 0.0,
                },
                destination_location: NewLocation {
                    name: "Home".into(),
                    latitude: 0.0,
                    longitude: 1.0,
                },
            },
        )
        .await
        .expect("create ride");
    let update = next_json(&mut client).await;
    assert_eq!(update["type"], "ride_update");
    assert_eq!(update["data"]["id"], ride.id.as_str());
    assert_eq!(update["data"]["status"], "searching");

    client.close(None).await.expect("close");
    drop(client);

    let deadline = tokio::time::Instant::now() + WAIT;
    while server.state.registry.connection_count(&rider.id).await > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection still registered after close"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
