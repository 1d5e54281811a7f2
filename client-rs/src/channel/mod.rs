//! Live channel
//!
//! - `manager`: connection state machine, subscriptions and observers
//! - `messages`: the JSON frames and topics
//! - `transport`: the connection seam and its WebSocket implementation

mod manager;
mod messages;
mod transport;

pub use manager::{
    backoff_delay, ConnectionManager, ConnectionState, ErrorObserver, MessageHandler, ObserverId,
    StatusObserver, Subscription,
};
pub use messages::{ClientMessage, ServerMessage, Topic, UnknownTopic};
pub use transport::{ChannelConnection, ChannelTransport, WebSocketTransport};
