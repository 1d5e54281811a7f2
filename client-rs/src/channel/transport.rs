//! Live channel transport seam

use crate::channel::messages::{ClientMessage, ServerMessage};
use crate::error::{ChannelError, ChannelResult};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens connections to the channel endpoint
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn open(&self, url: &str) -> ChannelResult<Box<dyn ChannelConnection>>;
}

/// One open, bidirectional connection.
///
/// `recv` must be cancel-safe: the connection manager polls it inside
/// `tokio::select!` alongside outbound traffic.
#[async_trait]
pub trait ChannelConnection: Send {
    async fn send(&mut self, message: &ClientMessage) -> ChannelResult<()>;

    /// Next frame; `None` once the peer has closed the connection
    async fn recv(&mut self) -> Option<ChannelResult<ServerMessage>>;

    async fn close(&mut self);
}

/// WebSocket transport carrying JSON text frames
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> ChannelResult<Box<dyn ChannelConnection>> {
        debug!(url, "Opening channel");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChannelConnection for WebSocketConnection {
    async fn send(&mut self, message: &ClientMessage) -> ChannelResult<()> {
        let text = serde_json::to_string(message)?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ChannelResult<ServerMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(ChannelError::from))
                }
                Ok(Message::Binary(bytes)) => {
                    return Some(serde_json::from_slice(&bytes).map_err(ChannelError::from))
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Channel closed by server");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(_) => continue,
                Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
