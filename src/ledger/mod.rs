//! Ledger node integration.
//!
//! Defines the transport traits the stream client runs on and provides:
//! - `protocol`: rippled WebSocket message schemas and commands
//! - `classifier`: ledger transaction → `Bet`
//! - `client`: the stream client state machine
//! - `ws`: tokio-tungstenite transport
//! - `signer`: payment signing collaborators

pub mod classifier;
pub mod client;
pub mod protocol;
pub mod signer;
pub mod ws;

use async_trait::async_trait;

use crate::types::VenueResult;

/// An open, bidirectional text channel to a ledger node.
#[async_trait]
pub trait LedgerConnection: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> VenueResult<()>;

    /// Next text frame. `Ok(None)` when the node closed the connection.
    async fn next_text(&mut self) -> VenueResult<Option<String>>;

    /// Best-effort close.
    async fn close(&mut self);
}

/// Opens connections to a ledger node.
///
/// Implementors provide the transport only; subscription and replay
/// logic lives in the stream client.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn connect(&self) -> VenueResult<Box<dyn LedgerConnection>>;

    /// Endpoint identifier for logging.
    fn endpoint(&self) -> &str;
}
