//! Event-channel WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::events::{self, ClientEvent, ServerEvent};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// One physical duplex connection. The caller must drop the previous socket
/// before opening another (teardown-before-reopen on relogin/reconnect).
pub struct ChatSocket {
    stream: WsStream,
}

impl ChatSocket {
    /// Connect to the event channel.
    ///
    /// Identity is carried by the `username` query parameter in the URL;
    /// no auth headers or messages are needed on the WebSocket itself.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        tracing::info!("Connecting event channel to {}", ws_url);

        let (stream, response) = connect_async(ws_url)
            .await
            .context("Event channel connection failed")?;

        tracing::info!("Event channel connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a typed event as a text frame.
    pub async fn send_event(&mut self, event: &ClientEvent) -> Result<()> {
        let frame = event.to_frame().context("Failed to encode event")?;
        tracing::debug!("WS send: {}", frame);
        self.stream
            .send(Message::Text(frame))
            .await
            .context("Failed to send event frame")
    }

    /// Receive the next typed event, ignoring pings/pongs.
    ///
    /// Frames that do not decode are logged and skipped rather than tearing
    /// down the connection. Returns `None` when the server closes.
    pub async fn recv_event(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    match events::parse_frame(&text) {
                        Ok(event) => return Ok(Some(event)),
                        Err(e) => {
                            tracing::warn!("Undecodable event frame ({}): {}", e, text);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("Event channel closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("Event channel receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }
}
