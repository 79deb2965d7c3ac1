//! Bet classifier.
//!
//! Turns a ledger transaction (live notification or `account_tx` entry)
//! into a canonical [`Bet`], or filters it out. Filtering is silent apart
//! from a debug line; structural problems are classification errors,
//! logged and dropped without crashing the stream.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, error, warn};

use super::protocol::{HistoryEntry, RawMeta, RawTransaction, TransactionMessage};
use crate::types::{Bet, VenueError, VenueResult};

/// Unix time of the Ripple epoch (2000-01-01T00:00:00Z).
pub const RIPPLE_EPOCH_OFFSET: i64 = 946_684_800;

/// Convert a ledger `date` (seconds since the Ripple epoch) to UTC.
pub fn ripple_time_to_utc(date: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(date).ok()?.checked_add(RIPPLE_EPOCH_OFFSET)?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Classify a live transaction notification.
pub fn classify(msg: &TransactionMessage, venue_account: &str) -> Option<Bet> {
    let ledger_index = msg.ledger_index.or(msg.transaction.ledger_index);
    log_failure(classify_record(
        &msg.transaction,
        msg.meta.as_ref(),
        msg.validated,
        ledger_index,
        venue_account,
    ))
}

/// Classify an `account_tx` page, preserving delivery order.
pub fn classify_history(entries: &[HistoryEntry], venue_account: &str) -> Vec<Bet> {
    entries
        .iter()
        .filter_map(|entry| {
            log_failure(classify_record(
                &entry.tx,
                entry.meta.as_ref(),
                entry.validated,
                entry.tx.ledger_index,
                venue_account,
            ))
        })
        .collect()
}

fn log_failure(result: VenueResult<Option<Bet>>) -> Option<Bet> {
    match result {
        Ok(bet) => bet,
        Err(e) => {
            error!(error = %e, "Classification failed, bet discarded");
            None
        }
    }
}

/// Core extraction shared by live and historical records.
///
/// `Ok(None)` means the transaction is not a wager; `Err` means it looked
/// like one but could not be read.
pub fn classify_record(
    tx: &RawTransaction,
    meta: Option<&RawMeta>,
    validated: bool,
    ledger_index: Option<u64>,
    venue_account: &str,
) -> VenueResult<Option<Bet>> {
    if !validated {
        debug!(tx_hash = %tx.hash, "Not validated yet, ignoring");
        return Ok(None);
    }
    if tx.account == venue_account {
        debug!(tx_hash = %tx.hash, "Outgoing venue transaction, ignoring");
        return Ok(None);
    }
    if tx.transaction_type != "Payment" {
        debug!(tx_hash = %tx.hash, kind = %tx.transaction_type, "Not a payment, ignoring");
        return Ok(None);
    }
    if tx.destination.as_deref() != Some(venue_account) {
        debug!(tx_hash = %tx.hash, "Payment not addressed to the venue, ignoring");
        return Ok(None);
    }

    let meta = meta.ok_or_else(|| VenueError::classification(&tx.hash, "missing meta"))?;

    if let Some(result) = meta.transaction_result.as_deref() {
        if result != "tesSUCCESS" {
            warn!(tx_hash = %tx.hash, result, "Payment did not succeed, ignoring");
            return Ok(None);
        }
    }

    let amount_drops = match native_amount(tx, meta)? {
        Some(drops) => drops,
        None => {
            warn!(tx_hash = %tx.hash, "Non-XRP payment, ignoring");
            return Ok(None);
        }
    };
    if amount_drops == 0 {
        return Err(VenueError::classification(&tx.hash, "zero amount"));
    }

    let fee_drops = tx
        .fee
        .as_deref()
        .ok_or_else(|| VenueError::classification(&tx.hash, "missing Fee"))?
        .parse::<u64>()
        .map_err(|e| VenueError::classification(&tx.hash, format!("bad Fee: {e}")))?;

    let ledger_index = ledger_index
        .ok_or_else(|| VenueError::classification(&tx.hash, "missing ledger_index"))?;

    let timestamp = tx
        .date
        .and_then(ripple_time_to_utc)
        .ok_or_else(|| VenueError::classification(&tx.hash, "missing or invalid date"))?;

    let bankroll_drops = bankroll(meta, venue_account, &tx.hash)?;

    Ok(Some(Bet {
        account: tx.account.clone(),
        amount_drops,
        fee_drops,
        ledger_index,
        tx_hash: tx.hash.clone(),
        timestamp,
        destination_tag: tx.destination_tag,
        bankroll_drops,
    }))
}

/// Drops received. Prefers `delivered_amount` so a partial payment only
/// counts what actually arrived. `None` for issued currencies.
fn native_amount(tx: &RawTransaction, meta: &RawMeta) -> VenueResult<Option<u64>> {
    let delivered = match meta.delivered_amount.as_ref() {
        Some(Value::Object(_)) => return Ok(None),
        // Old ledgers report "unavailable"; fall back to Amount.
        Some(v @ Value::String(s)) if s != "unavailable" => Some(v),
        _ => None,
    };
    let amount = delivered
        .or(tx.amount.as_ref())
        .ok_or_else(|| VenueError::classification(&tx.hash, "missing Amount"))?;

    match amount {
        Value::String(drops) => drops
            .parse::<u64>()
            .map(Some)
            .map_err(|e| VenueError::classification(&tx.hash, format!("bad Amount {drops}: {e}"))),
        Value::Object(_) => Ok(None),
        other => Err(VenueError::classification(
            &tx.hash,
            format!("unexpected Amount shape: {other}"),
        )),
    }
}

/// Venue balance after the transaction, from its `AccountRoot` node.
fn bankroll(meta: &RawMeta, venue_account: &str, tx_hash: &str) -> VenueResult<u64> {
    let root = meta
        .affected_nodes
        .iter()
        .filter_map(|node| node.account_root())
        .find(|root| root.account == venue_account)
        .ok_or_else(|| VenueError::classification(tx_hash, "no venue balance in AffectedNodes"))?;

    root.balance
        .parse::<u64>()
        .map_err(|e| VenueError::classification(tx_hash, format!("bad Balance {}: {e}", root.balance)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
