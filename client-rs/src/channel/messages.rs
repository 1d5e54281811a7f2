//! Frames exchanged over the live channel
//!
//! Every frame is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake credential, always the first frame on a connection
    Auth { token: String },

    SubscribeNodes,

    UnsubscribeNodes,

    SubscribeDiagnostics { topic_id: String },

    UnsubscribeDiagnostics { topic_id: String },

    /// Ask for a full snapshot; answered with `realtime_nodes`
    GetRealtimeNodes,

    /// Keepalive
    Ping { seq: u64 },
}

/// Frames received from server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    AuthError { message: String },

    /// Periodic status of every node
    NodesStatusUpdate {
        #[serde(default)]
        payload: Value,
    },

    /// A single node changed status
    NodeStatusChanged {
        #[serde(default)]
        payload: Value,
    },

    /// Snapshot requested with `get_realtime_nodes`
    RealtimeNodes {
        #[serde(default)]
        payload: Value,
    },

    DiagnosticsUpdate {
        topic_id: String,
        #[serde(default)]
        payload: Value,
    },

    Pong { seq: u64 },

    Error { message: String },
}

impl ServerMessage {
    /// Wire name of this frame's `type`
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::AuthOk { .. } => "auth_ok",
            ServerMessage::AuthError { .. } => "auth_error",
            ServerMessage::NodesStatusUpdate { .. } => "nodes_status_update",
            ServerMessage::NodeStatusChanged { .. } => "node_status_changed",
            ServerMessage::RealtimeNodes { .. } => "realtime_nodes",
            ServerMessage::DiagnosticsUpdate { .. } => "diagnostics_update",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Split a data frame into the topic it belongs to and its payload.
    ///
    /// Control frames (`auth_*`, `pong`, `error`) belong to no topic.
    pub fn into_topic_event(self) -> Option<(Topic, &'static str, Value)> {
        let event = self.event_name();
        match self {
            ServerMessage::NodesStatusUpdate { payload }
            | ServerMessage::NodeStatusChanged { payload }
            | ServerMessage::RealtimeNodes { payload } => Some((Topic::Nodes, event, payload)),
            ServerMessage::DiagnosticsUpdate { topic_id, payload } => {
                Some((Topic::Diagnostics(topic_id), event, payload))
            }
            _ => None,
        }
    }
}

/// A stream of updates a callback can subscribe to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Status events for every node
    Nodes,
    /// Diagnostics of one topic id
    Diagnostics(String),
}

impl Topic {
    pub fn diagnostics(topic_id: impl Into<String>) -> Self {
        Topic::Diagnostics(topic_id.into())
    }

    pub fn subscribe_message(&self) -> ClientMessage {
        match self {
            Topic::Nodes => ClientMessage::SubscribeNodes,
            Topic::Diagnostics(id) => ClientMessage::SubscribeDiagnostics {
                topic_id: id.clone(),
            },
        }
    }

    pub fn unsubscribe_message(&self) -> ClientMessage {
        match self {
            Topic::Nodes => ClientMessage::UnsubscribeNodes,
            Topic::Diagnostics(id) => ClientMessage::UnsubscribeDiagnostics {
                topic_id: id.clone(),
            },
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Nodes => f.write_str("nodes"),
            Topic::Diagnostics(id) => write!(f, "diagnostics:{}", id),
        }
    }
}

/// Error returned when a topic name is neither `nodes` nor `diagnostics:<id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTopic(pub String);

impl fmt::Display for UnknownTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown topic '{}'", self.0)
    }
}

impl std::error::Error for UnknownTopic {}

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "nodes" => Ok(Topic::Nodes),
            Some(("diagnostics", id)) if !id.is_empty() => Ok(Topic::diagnostics(id)),
            _ => Err(UnknownTopic(s.to_string())),
        }
    }
}
