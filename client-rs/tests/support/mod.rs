//! In-process mock of the monitoring backend: HTTP API plus WebSocket channel

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use pulsewatch_client::{is_expired, ClientMessage, Envelope, LoginData, RefreshData, ServerMessage};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";

#[derive(Clone)]
pub struct MockState {
    inner: Arc<MockInner>,
}

struct MockInner {
    issued: Mutex<HashSet<String>>,
    login_ttl_secs: AtomicU64,
    login_hits: AtomicUsize,
    refresh_hits: AtomicUsize,
    refresh_delay: Duration,
    ws_sessions: AtomicUsize,
    ws_frames: Mutex<Vec<ClientMessage>>,
    kick: broadcast::Sender<()>,
}

impl MockState {
    fn new() -> Self {
        let (kick, _) = broadcast::channel(4);
        Self {
            inner: Arc::new(MockInner {
                issued: Mutex::new(HashSet::new()),
                login_ttl_secs: AtomicU64::new(3600),
                login_hits: AtomicUsize::new(0),
                refresh_hits: AtomicUsize::new(0),
                refresh_delay: Duration::from_millis(100),
                ws_sessions: AtomicUsize::new(0),
                ws_frames: Mutex::new(Vec::new()),
                kick,
            }),
        }
    }

    /// Mint a token valid for `ttl_secs` and remember it as issued
    pub fn issue(&self, ttl_secs: u64) -> String {
        let exp = now_secs() + ttl_secs;
        let claims = json!({
            "exp": exp,
            "sub": USERNAME,
            "role": "admin",
            "nonce": uuid::Uuid::new_v4().to_string(),
        });
        let token = format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(claims.to_string()),
            URL_SAFE_NO_PAD.encode(b"mock-signature"),
        );
        self.inner.issued.lock().insert(token.clone());
        token
    }

    fn is_issued(&self, token: &str) -> bool {
        self.inner.issued.lock().contains(token)
    }

    fn accepts(&self, token: &str) -> bool {
        self.is_issued(token) && !is_expired(token)
    }

    /// Forget every issued token, as a server-side logout-everywhere would
    pub fn revoke_all(&self) {
        self.inner.issued.lock().clear();
    }

    pub fn set_login_ttl(&self, secs: u64) {
        self.inner.login_ttl_secs.store(secs, Ordering::SeqCst);
    }

    pub fn login_hits(&self) -> usize {
        self.inner.login_hits.load(Ordering::SeqCst)
    }

    pub fn refresh_hits(&self) -> usize {
        self.inner.refresh_hits.load(Ordering::SeqCst)
    }

    pub fn ws_sessions(&self) -> usize {
        self.inner.ws_sessions.load(Ordering::SeqCst)
    }

    /// Frames received on authenticated WebSocket sessions, `ping` excluded
    pub fn ws_frames(&self) -> Vec<ClientMessage> {
        self.inner.ws_frames.lock().clone()
    }

    /// Close every open WebSocket session from the server side
    pub fn kick_all(&self) {
        let _ = self.inner.kick.send(());
    }
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: MockState,
}

impl MockBackend {
    pub async fn spawn() -> Self {
        let state = MockState::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn channel_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn router(state: MockState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/v2/auth/login", post(bad_gateway))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/nodes", get(nodes))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn rejected<T>(status: StatusCode, error: &str) -> (StatusCode, Json<Envelope<T>>) {
    (status, Json(Envelope::failure(error)))
}

async fn login(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Envelope<LoginData>>) {
    state.inner.login_hits.fetch_add(1, Ordering::SeqCst);

    if body["username"] != USERNAME || body["password"] != PASSWORD {
        return rejected(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }

    let token = state.issue(state.inner.login_ttl_secs.load(Ordering::SeqCst));
    let data = LoginData {
        token,
        user: Some(json!({"username": USERNAME, "role": "admin"})),
    };
    (StatusCode::OK, Json(Envelope::ok(data)))
}

async fn bad_gateway() -> impl IntoResponse {
    (StatusCode::BAD_GATEWAY, "Bad Gateway")
}

async fn refresh(
    State(state): State<MockState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Envelope<RefreshData>>) {
    state.inner.refresh_hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.inner.refresh_delay).await;

    // expired tokens may be renewed, unknown ones may not
    match bearer(&headers) {
        Some(token) if state.is_issued(token) => {
            let token = state.issue(3600);
            (StatusCode::OK, Json(Envelope::ok(RefreshData { token })))
        }
        _ => rejected(StatusCode::UNAUTHORIZED, "Invalid token"),
    }
}

async fn logout(State(state): State<MockState>, headers: HeaderMap) -> Json<Value> {
    if let Some(token) = bearer(&headers) {
        state.inner.issued.lock().remove(token);
    }
    Json(json!({"success": true}))
}

async fn nodes(
    State(state): State<MockState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Envelope<Value>>) {
    match bearer(&headers) {
        Some(token) if state.accepts(token) => (
            StatusCode::OK,
            Json(Envelope::ok(json!([{"id": 1, "status": "up"}]))),
        ),
        _ => rejected(StatusCode::UNAUTHORIZED, "Invalid token"),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<MockState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_frame<S>(sender: &mut S, message: &ServerMessage) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = serde_json::to_string(message).unwrap();
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn handle_socket(socket: WebSocket, state: MockState) {
    let (mut sender, mut receiver) = socket.split();
    let mut kick = state.inner.kick.subscribe();

    let accepted = match receiver.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Auth { token }) => state.accepts(&token),
            _ => false,
        },
        _ => return,
    };

    if !accepted {
        let reply = ServerMessage::AuthError {
            message: "invalid token".into(),
        };
        send_frame(&mut sender, &reply).await;
        return;
    }

    let session = state.inner.ws_sessions.fetch_add(1, Ordering::SeqCst) + 1;
    let reply = ServerMessage::AuthOk {
        client_id: Some(format!("session-{}", session)),
    };
    if !send_frame(&mut sender, &reply).await {
        return;
    }

    loop {
        tokio::select! {
            _ = kick.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let Ok(message) = serde_json::from_str::<ClientMessage>(text.as_str()) else {
                    continue;
                };

                let reply = match &message {
                    ClientMessage::SubscribeNodes => Some(ServerMessage::NodesStatusUpdate {
                        payload: json!([{"id": 1, "status": "up"}]),
                    }),
                    ClientMessage::SubscribeDiagnostics { topic_id } => {
                        Some(ServerMessage::DiagnosticsUpdate {
                            topic_id: topic_id.clone(),
                            payload: json!({"cpu": 12}),
                        })
                    }
                    ClientMessage::GetRealtimeNodes => Some(ServerMessage::RealtimeNodes {
                        payload: json!([{"id": 1, "status": "up", "latency_ms": 4}]),
                    }),
                    ClientMessage::Ping { seq } => Some(ServerMessage::Pong { seq: *seq }),
                    _ => None,
                };

                if !matches!(message, ClientMessage::Ping { .. }) {
                    state.inner.ws_frames.lock().push(message);
                }
                if let Some(reply) = reply {
                    if !send_frame(&mut sender, &reply).await {
                        return;
                    }
                }
            }
        }
    }
}
