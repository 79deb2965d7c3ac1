//! WebSocket transport to a rippled node (tokio-tungstenite).

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::{LedgerConnection, LedgerConnector};
use crate::types::{VenueError, VenueResult};

/// Connects to `wss://` / `ws://` rippled endpoints.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl LedgerConnector for WsConnector {
    async fn connect(&self) -> VenueResult<Box<dyn LedgerConnection>> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| VenueError::Transport(format!("connect {}: {e}", self.url)))?;

        info!(url = %self.url, status = %response.status(), "Connected to ledger node");
        Ok(Box::new(WsConnection { stream }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LedgerConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> VenueResult<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| VenueError::Transport(format!("send: {e}")))
    }

    async fn next_text(&mut self) -> VenueResult<Option<String>> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(VenueError::Transport(format!("receive: {e}"))),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    // rippled only sends text, but accept UTF-8 binary frames.
                    match String::from_utf8(bytes) {
                        Ok(text) => return Ok(Some(text)),
                        Err(_) => debug!("Dropping non-UTF-8 binary frame"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Node sent close frame");
                    return Ok(None);
                }
                // Pings are answered by tungstenite on the next read/write.
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
