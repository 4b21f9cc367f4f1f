//! End-to-end tests against a real server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use relay_core::{ConnectionId, Hello, Role, SessionId, StoreError};
use relay_server::bus::MemoryBus;
use relay_server::registry::{MemorySessionStore, RoleClaim, Session, SessionStore};
use relay_server::{RelayServer, ServerConfig};
use relay_settings::RoleConflictPolicy;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestRelay {
    server: RelayServer,
    http: String,
    ws: String,
}

/// Boot an in-memory relay.
async fn boot(config: ServerConfig) -> TestRelay {
    serve(RelayServer::in_memory(config)).await
}

async fn serve(server: RelayServer) -> TestRelay {
    let (addr, _handle) = server.listen().await.unwrap();
    TestRelay {
        server,
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}/ws"),
    }
}

async fn boot_default() -> TestRelay {
    boot(ServerConfig::default()).await
}

impl TestRelay {
    async fn register(&self) -> (String, String) {
        let body: Value = reqwest::Client::new()
            .post(format!("{}/api/register", self.http))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        (
            body["sessionId"].as_str().unwrap().to_owned(),
            body["token"].as_str().unwrap().to_owned(),
        )
    }

    async fn session_info(&self, sid: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}/api/session/{sid}", self.http))
            .send()
            .await
            .unwrap()
    }

    async fn connect(&self) -> WsStream {
        let (ws, _) = connect_async(self.ws.as_str()).await.unwrap();
        ws
    }

    /// Connect, say hello, and consume the `hello-ack`.
    async fn join(&self, sid: &str, token: &str, role: Role) -> WsStream {
        let mut ws = self.connect().await;
        send_hello(&mut ws, sid, token, role).await;
        let ack = read_json(&mut ws).await;
        assert_eq!(ack, json!({"type": "hello-ack", "sessionId": sid}));
        ws
    }
}

async fn send_hello(ws: &mut WsStream, sid: &str, token: &str, role: Role) {
    ws.send(Message::text(Hello::new(sid, token, role).to_json()))
        .await
        .unwrap();
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text.to_owned())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Read until the close frame and return its code.
async fn read_close(ws: &mut WsStream) -> u16 {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended without close frame")
            .expect("ws error");
        if let Message::Close(frame) = msg {
            return frame.map_or(1005, |f| u16::from(f.code));
        }
    }
}

/// Assert nothing but control frames arrives within `window`.
async fn assert_quiet(ws: &mut WsStream, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }
}

fn assert_frame(msg: &Value, from: Role, payload: &str) {
    assert_eq!(msg["type"], "frame");
    assert_eq!(msg["fromRole"], from.as_str());
    assert_eq!(msg["frame"], payload);
    assert_eq!(msg["b64"], false);
    assert!(msg["at"].is_i64());
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_pairing_relay_heartbeat_and_delete() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;

    let mut ws = relay.join(&sid, &token, Role::Workstation).await;
    let mut phone = relay.join(&sid, &token, Role::Phone).await;

    assert_eq!(read_json(&mut phone).await, json!({"type": "peer-joined", "role": "workstation"}));
    assert_eq!(read_json(&mut ws).await, json!({"type": "peer-joined", "role": "phone"}));

    send_text(&mut ws, "ping-1").await;
    let got = read_json(&mut phone).await;
    assert_frame(&got, Role::Workstation, "ping-1");
    assert_eq!(got["sessionId"], sid.as_str());

    send_text(&mut phone, "pong-1").await;
    assert_frame(&read_json(&mut ws).await, Role::Phone, "pong-1");

    let before: Value = relay.session_info(&sid).await.json().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    send_text(&mut phone, r#"{"type":"hb"}"#).await;
    assert_eq!(read_json(&mut phone).await, json!({"type": "hb-ack"}));
    let after: Value = relay.session_info(&sid).await.json().await.unwrap();
    let parse = |v: &Value| v["lastActiveAt"].as_str().unwrap().parse::<DateTime<Utc>>().unwrap();
    assert!(parse(&after) > parse(&before));
    assert_eq!(after["roles"], json!({"workstation": true, "phone": true}));

    let resp = reqwest::Client::new()
        .delete(format!("{}/api/session/{sid}", relay.http))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    assert_eq!(read_json(&mut ws).await, json!({"type": "session-killed"}));
    assert_eq!(read_close(&mut ws).await, 4003);
    assert_eq!(read_json(&mut phone).await, json!({"type": "session-killed"}));
    assert_eq!(read_close(&mut phone).await, 4003);

    assert_eq!(relay.session_info(&sid).await.status(), 404);
    let mut late = relay.connect().await;
    send_hello(&mut late, &sid, &token, Role::Phone).await;
    assert_eq!(read_close(&mut late).await, 4001);
}

#[tokio::test]
async fn frames_keep_sender_order_and_never_echo() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.join(&sid, &token, Role::Workstation).await;
    let mut phone = relay.join(&sid, &token, Role::Phone).await;
    let _ = read_json(&mut phone).await;
    let _ = read_json(&mut ws).await;

    for i in 0..20 {
        send_text(&mut ws, &format!("m{i}")).await;
    }
    for i in 0..20 {
        assert_frame(&read_json(&mut phone).await, Role::Workstation, &format!("m{i}"));
    }
    assert_quiet(&mut ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn no_backfill_for_late_joiner() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.join(&sid, &token, Role::Workstation).await;
    for i in 0..3 {
        send_text(&mut ws, &format!("early-{i}")).await;
    }
    // let the early frames drain through the channel
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut phone = relay.join(&sid, &token, Role::Phone).await;
    assert_eq!(read_json(&mut phone).await, json!({"type": "peer-joined", "role": "workstation"}));
    assert_quiet(&mut phone, Duration::from_millis(200)).await;

    send_text(&mut ws, "after").await;
    assert_frame(&read_json(&mut phone).await, Role::Workstation, "after");
}

#[tokio::test]
async fn binary_frames_are_base64_flagged() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.join(&sid, &token, Role::Workstation).await;
    let mut phone = relay.join(&sid, &token, Role::Phone).await;
    let _ = read_json(&mut phone).await;

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let got = read_json(&mut phone).await;
    assert_eq!(got["type"], "frame");
    assert_eq!(got["b64"], true);
    assert_eq!(got["frame"], "AQID");
}

#[tokio::test]
async fn second_phone_supersedes_first() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.join(&sid, &token, Role::Workstation).await;
    let mut phone1 = relay.join(&sid, &token, Role::Phone).await;
    assert_eq!(read_json(&mut ws).await, json!({"type": "peer-joined", "role": "phone"}));

    let mut phone2 = relay.join(&sid, &token, Role::Phone).await;
    assert_eq!(read_close(&mut phone1).await, 4002);
    assert_eq!(read_json(&mut phone2).await, json!({"type": "peer-joined", "role": "workstation"}));
    assert_eq!(read_json(&mut ws).await, json!({"type": "peer-left", "role": "phone"}));
    assert_eq!(read_json(&mut ws).await, json!({"type": "peer-joined", "role": "phone"}));

    send_text(&mut ws, "to-new-phone").await;
    assert_frame(&read_json(&mut phone2).await, Role::Workstation, "to-new-phone");
}

#[tokio::test]
async fn reject_policy_refuses_second_phone() {
    let relay = boot(ServerConfig {
        role_conflict: RoleConflictPolicy::Reject,
        ..ServerConfig::default()
    })
    .await;
    let (sid, token) = relay.register().await;
    let mut phone1 = relay.join(&sid, &token, Role::Phone).await;

    let mut phone2 = relay.connect().await;
    send_hello(&mut phone2, &sid, &token, Role::Phone).await;
    assert_eq!(read_close(&mut phone2).await, 4001);

    send_text(&mut phone1, r#"{"type":"hb"}"#).await;
    assert_eq!(read_json(&mut phone1).await, json!({"type": "hb-ack"}));
}

#[tokio::test]
async fn handshake_failures_close_with_4001() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;

    let mut bad_token = relay.connect().await;
    send_hello(&mut bad_token, &sid, "wrong", Role::Phone).await;
    assert_eq!(read_close(&mut bad_token).await, 4001);

    let mut unknown = relay.connect().await;
    send_hello(&mut unknown, "0123456789abcdef0123456789abcdef", &token, Role::Phone).await;
    assert_eq!(read_close(&mut unknown).await, 4001);

    let mut not_hello = relay.connect().await;
    send_text(&mut not_hello, "ping-1").await;
    assert_eq!(read_close(&mut not_hello).await, 4001);

    let mut bad_role = relay.connect().await;
    send_text(
        &mut bad_role,
        &json!({"type": "hello", "sessionId": sid, "token": token, "role": "tablet"}).to_string(),
    )
    .await;
    assert_eq!(read_close(&mut bad_role).await, 4001);
}

#[tokio::test]
async fn short_key_hello_is_accepted() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.connect().await;
    send_text(
        &mut ws,
        &json!({"type": "hello", "s": sid, "t": token, "r": "workstation"}).to_string(),
    )
    .await;
    assert_eq!(read_json(&mut ws).await["type"], "hello-ack");
}

#[tokio::test]
async fn silent_client_hits_handshake_timeout() {
    let relay = boot(ServerConfig {
        handshake_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    })
    .await;
    let mut ws = relay.connect().await;
    assert_eq!(read_close(&mut ws).await, 4001);
}

/// Memory store whose role claims never complete.
struct StuckClaims(MemorySessionStore);

#[async_trait]
impl SessionStore for StuckClaims {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        self.0.insert(session).await
    }

    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.0.get(id).await
    }

    async fn touch(&self, id: &SessionId, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        self.0.touch(id, at).await
    }

    async fn remove(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.0.remove(id).await
    }

    async fn claim_role(
        &self,
        _id: &SessionId,
        _role: Role,
        _conn: &ConnectionId,
        _policy: RoleConflictPolicy,
    ) -> Result<RoleClaim, StoreError> {
        std::future::pending().await
    }

    async fn release_role(&self, id: &SessionId, role: Role, conn: &ConnectionId) -> Result<bool, StoreError> {
        self.0.release_role(id, role, conn).await
    }

    async fn occupant(&self, id: &SessionId, role: Role) -> Result<Option<ConnectionId>, StoreError> {
        self.0.occupant(id, role).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<SessionId>, StoreError> {
        self.0.purge_expired(now).await
    }
}

#[tokio::test]
async fn stalled_store_cannot_hold_a_handshake_open() {
    let config = ServerConfig {
        handshake_timeout: Duration::from_millis(300),
        ..ServerConfig::default()
    };
    let store = Arc::new(StuckClaims(MemorySessionStore::new()));
    let relay = serve(RelayServer::new(config, store, Arc::new(MemoryBus::new()))).await;
    let (sid, token) = relay.register().await;

    let mut ws = relay.connect().await;
    send_hello(&mut ws, &sid, &token, Role::Phone).await;
    assert_eq!(read_close(&mut ws).await, 4001);
}

#[tokio::test]
async fn idle_session_expires_and_kills_peers() {
    let relay = boot(ServerConfig {
        session_ttl_secs: 1,
        sweep_interval: Duration::from_millis(100),
        ..ServerConfig::default()
    })
    .await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.join(&sid, &token, Role::Workstation).await;
    let mut phone = relay.join(&sid, &token, Role::Phone).await;
    let _ = read_json(&mut phone).await;
    let _ = read_json(&mut ws).await;

    assert_eq!(read_json(&mut ws).await, json!({"type": "session-killed"}));
    assert_eq!(read_close(&mut ws).await, 4003);
    assert_eq!(read_json(&mut phone).await, json!({"type": "session-killed"}));
    assert_eq!(read_close(&mut phone).await, 4003);

    let mut again = relay.connect().await;
    send_hello(&mut again, &sid, &token, Role::Phone).await;
    assert_eq!(read_close(&mut again).await, 4001);
}

#[tokio::test]
async fn transcript_reaches_workstation() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.join(&sid, &token, Role::Workstation).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/transcripts", relay.http))
        .json(&json!({"sid": sid, "tok": token, "text": "turn on the lights", "final_": true, "id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let got = read_json(&mut ws).await;
    assert_eq!(got["fromRole"], "phone");
    let msg: Value = serde_json::from_str(got["frame"].as_str().unwrap()).unwrap();
    assert_eq!(
        msg,
        json!({"type": "user_text", "v": 1, "id": "u1", "text": "turn on the lights", "source": "api", "final_": true})
    );

    let resp = client
        .post(format!("{}/api/transcripts", relay.http))
        .json(&json!({"sid": sid, "tok": "nope", "text": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn logs_round_trip_through_workstation() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.join(&sid, &token, Role::Workstation).await;

    let url = format!("{}/api/logs?sid={sid}&tok={token}&limit=500", relay.http);
    let request = tokio::spawn(async move { reqwest::get(url).await.unwrap() });

    let got = read_json(&mut ws).await;
    assert_eq!(got["fromRole"], "phone");
    let ask: Value = serde_json::from_str(got["frame"].as_str().unwrap()).unwrap();
    assert_eq!(ask["type"], "get_logs");
    assert_eq!(ask["limit"], 200);
    let reply = json!({"type": "logs", "replyTo": ask["id"], "items": [{"line": "booted"}]});
    send_text(&mut ws, &reply.to_string()).await;

    let resp = request.await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"items": [{"line": "booted"}]}));
}

#[tokio::test]
async fn logs_time_out_when_workstation_is_silent() {
    let relay = boot(ServerConfig {
        logs_request_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    })
    .await;
    let (sid, token) = relay.register().await;
    let _ws = relay.join(&sid, &token, Role::Workstation).await;
    let resp = reqwest::get(format!("{}/api/logs?sid={sid}&tok={token}", relay.http))
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
}

#[tokio::test]
async fn peer_left_on_disconnect() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let mut ws = relay.join(&sid, &token, Role::Workstation).await;
    let mut phone = relay.join(&sid, &token, Role::Phone).await;
    let _ = read_json(&mut ws).await;

    phone.close(None).await.unwrap();
    assert_eq!(read_json(&mut ws).await, json!({"type": "peer-left", "role": "phone"}));

    let info: Value = relay.session_info(&sid).await.json().await.unwrap();
    assert_eq!(info["roles"]["phone"], false);
}

#[tokio::test]
async fn health_counts_live_connections() {
    let relay = boot_default().await;
    let (sid, token) = relay.register().await;
    let _ws = relay.join(&sid, &token, Role::Workstation).await;
    let health: Value = reqwest::get(format!("{}/health", relay.http))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["active_sessions"], 1);
    assert_eq!(health["store_reachable"], true);
    assert_eq!(relay.server.context().hub.connection_count(), 1);
}
