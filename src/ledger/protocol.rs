//! rippled WebSocket message schemas.
//!
//! Inbound messages are untrusted: everything is deserialized through
//! explicit serde types, and anything that doesn't fit becomes a
//! `VenueError::Parse` for that one message rather than a silent default.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::types::{VenueError, VenueResult};

// ---------------------------------------------------------------------------
// Inbound: transactions
// ---------------------------------------------------------------------------

/// Transaction body as it appears in both stream notifications and
/// `account_tx` results. Only the fields the venue reads.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Destination", default)]
    pub destination: Option<String>,
    /// String of drops for XRP, an object for issued currencies.
    #[serde(rename = "Amount", default)]
    pub amount: Option<Value>,
    #[serde(rename = "Fee", default)]
    pub fee: Option<String>,
    #[serde(rename = "DestinationTag", default)]
    pub destination_tag: Option<u32>,
    /// Seconds since the Ripple epoch.
    #[serde(default)]
    pub date: Option<u64>,
    pub hash: String,
    /// Present on `account_tx` entries; stream notifications carry it
    /// at the top level instead.
    #[serde(default)]
    pub ledger_index: Option<u64>,
}

/// Transaction metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMeta {
    #[serde(rename = "AffectedNodes", default)]
    pub affected_nodes: Vec<AffectedNode>,
    #[serde(rename = "TransactionResult", default)]
    pub transaction_result: Option<String>,
    /// What actually arrived; differs from `Amount` for partial payments.
    #[serde(default)]
    pub delivered_amount: Option<Value>,
}

/// One entry of `meta.AffectedNodes`.
#[derive(Debug, Clone, Deserialize)]
pub enum AffectedNode {
    ModifiedNode(NodeChange),
    CreatedNode(NodeChange),
    DeletedNode(NodeChange),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeChange {
    #[serde(rename = "LedgerEntryType")]
    pub ledger_entry_type: String,
    #[serde(rename = "FinalFields", default)]
    pub final_fields: Option<Value>,
    #[serde(rename = "NewFields", default)]
    pub new_fields: Option<Value>,
}

/// `AccountRoot` fields we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountRootFields {
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Balance")]
    pub balance: String,
}

impl AffectedNode {
    /// Post-transaction `(account, balance)` if this node is an account root.
    pub fn account_root(&self) -> Option<AccountRootFields> {
        let (change, fields) = match self {
            AffectedNode::ModifiedNode(c) => (c, c.final_fields.as_ref()),
            AffectedNode::CreatedNode(c) => (c, c.new_fields.as_ref()),
            // A deleted account has no balance to report.
            AffectedNode::DeletedNode(_) => return None,
        };
        if change.ledger_entry_type != "AccountRoot" {
            return None;
        }
        fields.and_then(|f| serde_json::from_value(f.clone()).ok())
    }
}

/// `{"type": "transaction", ...}` stream notification.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionMessage {
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub ledger_index: Option<u64>,
    #[serde(default)]
    pub engine_result: Option<String>,
    pub transaction: RawTransaction,
    #[serde(default)]
    pub meta: Option<RawMeta>,
}

/// One element of an `account_tx` result.
///
/// API v1 nests the transaction under `tx`; v2 uses `tx_json` and keeps
/// `hash` and `ledger_index` on the entry itself.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(alias = "tx_json")]
    pub tx: RawTransaction,
    #[serde(default)]
    pub meta: Option<RawMeta>,
    #[serde(default)]
    pub validated: bool,
}

// ---------------------------------------------------------------------------
// Inbound: events
// ---------------------------------------------------------------------------

/// A parsed message from the ledger node.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// Live transaction affecting a subscribed account.
    Transaction(Box<TransactionMessage>),
    /// `account_tx` page.
    History {
        id: Option<u64>,
        entries: Vec<HistoryEntry>,
        /// Resume token; more pages follow when present.
        marker: Option<Value>,
        /// Entries on the page that could not be read.
        discarded: usize,
    },
    /// Result of a `submit`.
    SubmitResult {
        id: Option<u64>,
        engine_result: String,
        message: String,
        tx_hash: Option<String>,
    },
    /// Successful response with nothing else to act on (e.g. subscribe).
    Ack { id: Option<u64> },
    /// `status: "error"` response.
    CommandError {
        id: Option<u64>,
        error: String,
        message: String,
    },
    /// Any other message type (`ledgerClosed`, `serverStatus`, ...).
    Other { kind: String },
}

impl LedgerEvent {
    pub fn kind(&self) -> &str {
        match self {
            LedgerEvent::Transaction(_) => "transaction",
            LedgerEvent::History { .. } => "history",
            LedgerEvent::SubmitResult { .. } => "submit_result",
            LedgerEvent::Ack { .. } => "ack",
            LedgerEvent::CommandError { .. } => "command_error",
            LedgerEvent::Other { kind } => kind.as_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Entries stay raw so one unreadable entry costs only itself.
#[derive(Debug, Deserialize)]
struct HistoryResult {
    transactions: Vec<Value>,
    #[serde(default)]
    marker: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SubmitResultBody {
    engine_result: String,
    #[serde(default)]
    engine_result_message: String,
    #[serde(default)]
    tx_json: Option<SubmittedTx>,
}

#[derive(Debug, Deserialize)]
struct SubmittedTx {
    #[serde(default)]
    hash: Option<String>,
}

/// Parse one text frame from the node.
pub fn parse_message(text: &str) -> VenueResult<LedgerEvent> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| VenueError::Parse(format!("invalid JSON: {e}")))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| VenueError::Parse("message has no \"type\"".into()))?
        .to_string();

    match kind.as_str() {
        "transaction" => {
            let msg: TransactionMessage = serde_json::from_value(value)
                .map_err(|e| VenueError::Parse(format!("transaction notification: {e}")))?;
            Ok(LedgerEvent::Transaction(Box::new(msg)))
        }
        "response" => parse_response(value),
        _ => Ok(LedgerEvent::Other { kind }),
    }
}

fn parse_response(value: Value) -> VenueResult<LedgerEvent> {
    let envelope: ResponseEnvelope = serde_json::from_value(value)
        .map_err(|e| VenueError::Parse(format!("response envelope: {e}")))?;

    if envelope.status.as_deref() == Some("error") || envelope.error.is_some() {
        let error = envelope.error.unwrap_or_else(|| "unknown".to_string());
        return Ok(LedgerEvent::CommandError {
            id: envelope.id,
            message: envelope.error_message.unwrap_or_else(|| error.clone()),
            error,
        });
    }

    let Some(result) = envelope.result else {
        return Ok(LedgerEvent::Ack { id: envelope.id });
    };

    if result.get("transactions").is_some() {
        let history: HistoryResult = serde_json::from_value(result)
            .map_err(|e| VenueError::Parse(format!("account_tx result: {e}")))?;
        let total = history.transactions.len();
        let entries: Vec<HistoryEntry> = history
            .transactions
            .into_iter()
            .enumerate()
            .filter_map(|(position, raw)| match parse_history_entry(raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    error!(position, error = %e, "Classification failed, history entry discarded");
                    None
                }
            })
            .collect();
        return Ok(LedgerEvent::History {
            id: envelope.id,
            discarded: total - entries.len(),
            entries,
            marker: history.marker,
        });
    }

    if result.get("engine_result").is_some() {
        let submit: SubmitResultBody = serde_json::from_value(result)
            .map_err(|e| VenueError::Parse(format!("submit result: {e}")))?;
        return Ok(LedgerEvent::SubmitResult {
            id: envelope.id,
            engine_result: submit.engine_result,
            message: submit.engine_result_message,
            tx_hash: submit.tx_json.and_then(|t| t.hash),
        });
    }

    Ok(LedgerEvent::Ack { id: envelope.id })
}

/// Read one `account_tx` entry, lifting v2's entry-level `hash` and
/// `ledger_index` into the transaction body.
pub fn parse_history_entry(mut raw: Value) -> VenueResult<HistoryEntry> {
    if let Some(entry) = raw.as_object_mut() {
        let hash = entry.get("hash").cloned();
        let ledger_index = entry.get("ledger_index").cloned();
        if let Some(Value::Object(tx)) = entry.get_mut("tx_json") {
            if let Some(hash) = hash {
                tx.entry("hash").or_insert(hash);
            }
            if let Some(ledger_index) = ledger_index {
                tx.entry("ledger_index").or_insert(ledger_index);
            }
        }
    }
    let tx_hash = raw
        .pointer("/tx/hash")
        .or_else(|| raw.pointer("/tx_json/hash"))
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    serde_json::from_value(raw)
        .map_err(|e| VenueError::classification(&tx_hash, format!("account_tx entry: {e}")))
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub id: u64,
    pub command: &'static str,
    pub accounts: Vec<String>,
}

impl SubscribeRequest {
    pub fn new(id: u64, account: &str) -> Self {
        Self {
            id,
            command: "subscribe",
            accounts: vec![account.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountTxRequest {
    pub id: u64,
    pub command: &'static str,
    pub account: String,
    pub ledger_index_min: i64,
    pub ledger_index_max: i64,
    pub forward: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<Value>,
}

impl AccountTxRequest {
    /// Ascending history from `from_ledger`. Ledger 0 means "earliest
    /// available", which rippled spells `-1`.
    pub fn new(id: u64, account: &str, from_ledger: u64, marker: Option<Value>) -> Self {
        let ledger_index_min = if from_ledger == 0 {
            -1
        } else {
            i64::try_from(from_ledger).unwrap_or(i64::MAX)
        };
        Self {
            id,
            command: "account_tx",
            account: account.to_string(),
            ledger_index_min,
            ledger_index_max: -1,
            forward: true,
            marker,
        }
    }
}

/// Native amount in the venue's payment shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XrpAmount {
    pub currency: String,
    /// Drops, as a decimal string.
    pub value: String,
    pub issuer: String,
}

/// Unsigned `Payment` transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentTx {
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "Amount")]
    pub amount: XrpAmount,
    #[serde(rename = "DestinationTag", skip_serializing_if = "Option::is_none")]
    pub destination_tag: Option<u32>,
    #[serde(skip)]
    drops: u64,
}

impl PaymentTx {
    pub fn new(venue: &str, destination: &str, drops: u64, destination_tag: Option<u32>) -> Self {
        Self {
            transaction_type: "Payment".to_string(),
            account: venue.to_string(),
            destination: destination.to_string(),
            amount: XrpAmount {
                currency: "XRP".to_string(),
                value: drops.to_string(),
                issuer: venue.to_string(),
            },
            destination_tag,
            drops,
        }
    }

    pub fn drops(&self) -> u64 {
        self.drops
    }
}

/// A payment ready for `submit`, in one of the two forms rippled accepts.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SignedPayment {
    /// Node-side signing: the node receives the secret with the tx.
    WithSecret { tx_json: PaymentTx, secret: String },
    /// Pre-signed blob from an external signer.
    Blob { tx_blob: String },
}

impl SignedPayment {
    pub fn is_presigned(&self) -> bool {
        matches!(self, SignedPayment::Blob { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    pub id: u64,
    pub command: &'static str,
    #[serde(flatten)]
    pub payment: SignedPayment,
}

impl SubmitRequest {
    pub fn new(id: u64, payment: SignedPayment) -> Self {
        Self {
            id,
            command: "submit",
            payment,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
