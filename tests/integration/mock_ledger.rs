//! Scripted ledger node for integration testing.
//!
//! Each `connect()` consumes one `SessionScript`. The connection answers
//! commands the way rippled does (`account_tx` pages, subscribe acks,
//! submit results), correlating by request id, and records every command
//! it receives. When its outbound queue drains the connection reports
//! closed, which ends the venue session.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ledger_dice::ledger::{LedgerConnection, LedgerConnector};
use ledger_dice::types::{VenueError, VenueResult};

pub const VENUE: &str = "rVenueAccount";
pub const PLAYER: &str = "rPlayerOne";

/// Known 16-bit draws under secret "123456".
pub const WIN_HASH: &str = "E08D6E9754025BA2534A78707605E0601F03ACE063687A0CA1BDDACFCD1698C7"; // 5455
pub const WIN_HASH_2: &str = "B7E3C1D2A4F5968778695A4B3C2D1E0FF0E1D2C3B4A5968778695A4B3C2D1E0F"; // 28488
pub const LOSS_HASH: &str = "3C1F2A0B9D8E7F6A5B4C3D2E1F0A9B8C7D6E5F4A3B2C1D0E9F8A7B6C5D4E3F2A"; // 56791
pub const LOSS_HASH_2: &str = "A1B2C3D4E5F60718293A4B5C6D7E8F90A1B2C3D4E5F60718293A4B5C6D7E8F90"; // 48659

// ---------------------------------------------------------------------------
// Transaction builders
// ---------------------------------------------------------------------------

/// An incoming XRP payment to the venue.
#[derive(Debug, Clone)]
pub struct TestPayment {
    pub hash: String,
    pub from: String,
    pub destination: String,
    pub ledger: u64,
    pub amount: u64,
    pub bankroll: u64,
    pub tag: Option<u32>,
    pub kind: String,
}

impl TestPayment {
    pub fn bet(hash: &str, ledger: u64, amount: u64) -> Self {
        Self {
            hash: hash.to_string(),
            from: PLAYER.to_string(),
            destination: VENUE.to_string(),
            ledger,
            amount,
            bankroll: 100_000_000,
            tag: None,
            kind: "Payment".to_string(),
        }
    }

    pub fn bankroll(mut self, drops: u64) -> Self {
        self.bankroll = drops;
        self
    }

    pub fn tag(mut self, tag: u32) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn from(mut self, account: &str) -> Self {
        self.from = account.to_string();
        self
    }

    pub fn to(mut self, account: &str) -> Self {
        self.destination = account.to_string();
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    fn tx(&self) -> Value {
        let mut tx = json!({
            "Account": self.from,
            "TransactionType": self.kind,
            "Destination": self.destination,
            "Amount": self.amount.to_string(),
            "Fee": "12",
            "date": 750_000_000 + self.ledger,
            "hash": self.hash,
            "ledger_index": self.ledger,
        });
        if let Some(tag) = self.tag {
            tx["DestinationTag"] = json!(tag);
        }
        tx
    }

    fn meta(&self) -> Value {
        json!({
            "TransactionResult": "tesSUCCESS",
            "AffectedNodes": [{
                "ModifiedNode": {
                    "LedgerEntryType": "AccountRoot",
                    "FinalFields": {"Account": VENUE, "Balance": self.bankroll.to_string()}
                }
            }]
        })
    }

    /// `account_tx` result entry.
    pub fn history_entry(&self) -> Value {
        json!({"tx": self.tx(), "meta": self.meta(), "validated": true})
    }

    /// Live stream notification text.
    pub fn notification(&self) -> String {
        json!({
            "type": "transaction",
            "validated": true,
            "ledger_index": self.ledger,
            "engine_result": "tesSUCCESS",
            "transaction": self.tx(),
            "meta": self.meta(),
        })
        .to_string()
    }
}

// ---------------------------------------------------------------------------
// Session scripts
// ---------------------------------------------------------------------------

/// How one connection behaves.
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    /// `account_tx` pages in request order: (entries, marker).
    pub pages: Vec<(Vec<Value>, Option<Value>)>,
    /// Raw frames pushed after the subscribe ack.
    pub live: Vec<String>,
    /// Answer `account_tx` with this error instead of a page.
    pub backlog_error: Option<String>,
    /// Never answer `account_tx`.
    pub silent_backlog: bool,
    /// Keep the connection open once the outbound queue drains.
    pub hold_open: bool,
}

impl SessionScript {
    pub fn backlog(payments: &[TestPayment]) -> Self {
        Self {
            pages: vec![(payments.iter().map(TestPayment::history_entry).collect(), None)],
            ..Default::default()
        }
    }

    pub fn page(mut self, payments: &[TestPayment], marker: Option<Value>) -> Self {
        self.pages
            .push((payments.iter().map(TestPayment::history_entry).collect(), marker));
        self
    }

    /// A page of raw `account_tx` entries, malformed ones included.
    pub fn raw_page(mut self, entries: Vec<Value>, marker: Option<Value>) -> Self {
        self.pages.push((entries, marker));
        self
    }

    /// A node that accepts the connection but never answers `account_tx`.
    pub fn unresponsive() -> Self {
        Self {
            silent_backlog: true,
            hold_open: true,
            ..Default::default()
        }
    }

    pub fn live(mut self, payments: &[TestPayment]) -> Self {
        self.live.extend(payments.iter().map(TestPayment::notification));
        self
    }

    pub fn raw(mut self, frame: &str) -> Self {
        self.live.push(frame.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Connector / connection
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockNode {
    sessions: Arc<Mutex<VecDeque<SessionScript>>>,
    sent: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    pub fn new(sessions: Vec<SessionScript>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into())),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every command received, across sessions.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["command"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn submits(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|v| v["command"] == "submit")
            .collect()
    }
}

#[async_trait]
impl LedgerConnector for MockNode {
    async fn connect(&self) -> VenueResult<Box<dyn LedgerConnection>> {
        let script = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| VenueError::Transport("connection refused".into()))?;
        Ok(Box::new(MockConnection {
            pages: script.pages.into(),
            live: script.live,
            backlog_error: script.backlog_error,
            silent_backlog: script.silent_backlog,
            hold_open: script.hold_open,
            outbound: VecDeque::new(),
            sent: self.sent.clone(),
        }))
    }

    fn endpoint(&self) -> &str {
        "mock://ledger"
    }
}

struct MockConnection {
    pages: VecDeque<(Vec<Value>, Option<Value>)>,
    live: Vec<String>,
    backlog_error: Option<String>,
    silent_backlog: bool,
    hold_open: bool,
    outbound: VecDeque<String>,
    sent: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl LedgerConnection for MockConnection {
    async fn send_text(&mut self, text: String) -> VenueResult<()> {
        let command: Value = serde_json::from_str(&text).expect("venue sends valid JSON");
        self.sent.lock().unwrap().push(command.clone());
        let id = command["id"].clone();

        match command["command"].as_str() {
            Some("account_tx") => {
                if self.silent_backlog {
                    return Ok(());
                }
                if let Some(error) = &self.backlog_error {
                    self.outbound.push_back(
                        json!({"id": id, "type": "response", "status": "error",
                               "error": error, "error_message": "scripted failure"})
                        .to_string(),
                    );
                    return Ok(());
                }
                let (entries, marker) = self.pages.pop_front().unwrap_or_default();
                let mut result = json!({"account": VENUE, "transactions": entries});
                if let Some(marker) = marker {
                    result["marker"] = marker;
                }
                self.outbound.push_back(
                    json!({"id": id, "type": "response", "status": "success", "result": result})
                        .to_string(),
                );
            }
            Some("subscribe") => {
                self.outbound.push_back(
                    json!({"id": id, "type": "response", "status": "success", "result": {}})
                        .to_string(),
                );
                self.outbound.extend(self.live.drain(..));
            }
            Some("submit") => {
                self.outbound.push_back(
                    json!({
                        "id": id,
                        "type": "response",
                        "status": "success",
                        "result": {
                            "engine_result": "tesSUCCESS",
                            "engine_result_message": "The transaction was applied.",
                            "tx_json": {"hash": format!("PAYOUT{id}")}
                        }
                    })
                    .to_string(),
                );
            }
            _ => {}
        }
        Ok(())
    }

    async fn next_text(&mut self) -> VenueResult<Option<String>> {
        match self.outbound.pop_front() {
            Some(text) => Ok(Some(text)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) {}
}
