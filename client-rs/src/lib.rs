//! Pulsewatch Rust Client
//!
//! Client layer for the Pulsewatch monitoring backend: authenticated API
//! calls with transparent credential renewal, and a live channel for node
//! status and diagnostics updates that survives network drops.
//!
//! # Example
//!
//! ```no_run
//! use pulsewatch_client::{
//!     ApiClient, ClientConfig, ConnectionManager, FileCredentialStore, Topic,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("http://localhost:5000/api", "ws://localhost:5000/ws");
//!     let store = Arc::new(FileCredentialStore::open(FileCredentialStore::default_location()?)?);
//!
//!     let api = ApiClient::new(config.clone(), store.clone())?;
//!     api.login("admin", "secret").await?;
//!
//!     // Expired credentials are renewed before the call goes out
//!     let nodes = api.get::<serde_json::Value>("nodes").await?;
//!     println!("{:?}", nodes.data);
//!
//!     let channel = ConnectionManager::new(config, store);
//!     channel.on_status_change(|up| println!("channel up: {}", up));
//!     let _sub = channel.subscribe(Topic::Nodes, |event, payload| {
//!         println!("{}: {}", event, payload);
//!     });
//!     channel.connect();
//!
//!     Ok(())
//! }
//! ```

mod api;
mod channel;
mod config;
mod credential;
mod error;

pub use api::{
    ApiClient, Envelope, HttpRequest, HttpResponse, HttpTransport, LoginData, Method, RefreshData,
    RenewalCoordinator, Renewer, RequestOptions, ReqwestTransport,
};
pub use channel::{
    backoff_delay, ChannelConnection, ChannelTransport, ClientMessage, ConnectionManager,
    ConnectionState, ErrorObserver, MessageHandler, ObserverId, ServerMessage, StatusObserver,
    Subscription, Topic, UnknownTopic, WebSocketTransport,
};
pub use config::{ClientConfig, ENV_API_URL, ENV_CHANNEL_URL, ENV_REQUEST_TIMEOUT};
pub use credential::{
    decode_claims, is_expired, is_expired_at, Claims, Credential, CredentialStore, FileCredentialStore,
    InspectError, MemoryCredentialStore, Session, CREDENTIAL_KEY,
};
pub use error::{ApiError, ApiResult, ChannelError, ChannelResult, StoreError};
