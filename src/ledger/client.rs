//! Ledger stream client.
//!
//! Owns the connection to the node and the connection state machine:
//!
//! ```text
//! DISCONNECTED → CONNECTING → SUBSCRIBING_BACKLOG → REPLAYING_BACKLOG → LIVE_SUBSCRIBED
//!                    ↑                                                        │
//!                    └──────────────── RECONNECTING ←── (transport loss) ─────┘
//! ```
//!
//! Events are pulled one at a time with [`StreamClient::next_event`], so the
//! caller fully handles each message before the next is read.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{
    parse_message, AccountTxRequest, LedgerEvent, SignedPayment, SubmitRequest, SubscribeRequest,
};
use super::{LedgerConnection, LedgerConnector};
use crate::types::{VenueError, VenueResult};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    Disconnected,
    Connecting,
    SubscribingBacklog,
    ReplayingBacklog,
    LiveSubscribed,
    Reconnecting,
}

impl StreamState {
    /// Whether a transport is open in this state.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            StreamState::SubscribingBacklog
                | StreamState::ReplayingBacklog
                | StreamState::LiveSubscribed
        )
    }

    /// Legal transitions. Shutdown (→ Disconnected) is always allowed.
    pub fn can_transition_to(&self, next: StreamState) -> bool {
        use StreamState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) | (Reconnecting, Connecting) => true,
            (Connecting, SubscribingBacklog) => true,
            (SubscribingBacklog, ReplayingBacklog) => true,
            (ReplayingBacklog, LiveSubscribed) => true,
            (Connecting | SubscribingBacklog | ReplayingBacklog | LiveSubscribed, Reconnecting) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Disconnected => "DISCONNECTED",
            StreamState::Connecting => "CONNECTING",
            StreamState::SubscribingBacklog => "SUBSCRIBING_BACKLOG",
            StreamState::ReplayingBacklog => "REPLAYING_BACKLOG",
            StreamState::LiveSubscribed => "LIVE_SUBSCRIBED",
            StreamState::Reconnecting => "RECONNECTING",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct StreamClient {
    connector: Box<dyn LedgerConnector>,
    connection: Option<Box<dyn LedgerConnection>>,
    state: StreamState,
    next_id: u64,
    /// Identifies the current connection in logs.
    session: Option<Uuid>,
}

impl StreamClient {
    pub fn new(connector: Box<dyn LedgerConnector>) -> Self {
        Self {
            connector,
            connection: None,
            state: StreamState::Disconnected,
            next_id: 1,
            session: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn session(&self) -> Option<Uuid> {
        self.session
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    /// Move to `next`, logging the edge. Unexpected edges are applied but
    /// flagged.
    pub fn transition(&mut self, next: StreamState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected stream state transition");
        }
        debug!(from = %self.state, to = %next, "Stream state");
        self.state = next;
    }

    /// CONNECTING: open a fresh transport.
    pub async fn connect(&mut self) -> VenueResult<()> {
        if let Some(mut old) = self.connection.take() {
            old.close().await;
        }
        self.transition(StreamState::Connecting);

        match self.connector.connect().await {
            Ok(connection) => {
                let session = Uuid::new_v4();
                info!(endpoint = %self.connector.endpoint(), %session, "Ledger session opened");
                self.connection = Some(connection);
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                self.transition(StreamState::Reconnecting);
                Err(e)
            }
        }
    }

    /// SUBSCRIBING_BACKLOG: request account history from `from_ledger`.
    /// Pass the previous page's `marker` to continue paging.
    pub async fn request_backlog(
        &mut self,
        account: &str,
        from_ledger: u64,
        marker: Option<Value>,
    ) -> VenueResult<u64> {
        if marker.is_none() {
            self.transition(StreamState::SubscribingBacklog);
        }
        let id = self.allocate_id();
        let paging = marker.is_some();
        self.send(&AccountTxRequest::new(id, account, from_ledger, marker))
            .await?;
        info!(id, account, from_ledger, paging, "Requested backlog");
        Ok(id)
    }

    /// LIVE_SUBSCRIBED: subscribe to live transactions on `account`.
    pub async fn subscribe(&mut self, account: &str) -> VenueResult<u64> {
        let id = self.allocate_id();
        self.send(&SubscribeRequest::new(id, account)).await?;
        self.transition(StreamState::LiveSubscribed);
        info!(id, account, "Subscribed to live transactions");
        Ok(id)
    }

    /// Send a payment. Fire-and-forget: the result arrives later as a
    /// `SubmitResult` event carrying the returned id.
    pub async fn submit(&mut self, payment: SignedPayment) -> VenueResult<u64> {
        let id = self.allocate_id();
        let presigned = payment.is_presigned();
        self.send(&SubmitRequest::new(id, payment)).await?;
        debug!(id, presigned, "Submitted payment");
        Ok(id)
    }

    /// Next parsed event. Malformed messages are logged and skipped;
    /// a closed or broken transport is a `Transport` error.
    pub async fn next_event(&mut self) -> VenueResult<LedgerEvent> {
        loop {
            let connection = self
                .connection
                .as_mut()
                .ok_or_else(|| VenueError::Transport("not connected".into()))?;

            let text = match connection.next_text().await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    self.drop_connection().await;
                    return Err(VenueError::Transport("connection closed by node".into()));
                }
                Err(e) => {
                    self.drop_connection().await;
                    return Err(e);
                }
            };

            match parse_message(&text) {
                Ok(event) => return Ok(event),
                Err(e) => {
                    warn!(error = %e, len = text.len(), "Dropping unparseable message");
                }
            }
        }
    }

    /// Abandon the transport after a failure. State → RECONNECTING.
    pub async fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        if self.state != StreamState::Disconnected {
            self.transition(StreamState::Reconnecting);
        }
    }

    /// Orderly shutdown. State → DISCONNECTED.
    pub async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            info!(session = ?self.session, "Ledger session closed");
        }
        self.session = None;
        self.transition(StreamState::Disconnected);
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn send<T: Serialize>(&mut self, request: &T) -> VenueResult<()> {
        // Submit requests may carry the venue secret: never log the text.
        let text = serde_json::to_string(request)
            .map_err(|e| VenueError::Parse(format!("encode request: {e}")))?;

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| VenueError::Transport("not connected".into()))?;

        if let Err(e) = connection.send_text(text).await {
            self.drop_connection().await;
            return Err(e);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
