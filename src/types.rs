//! Shared types for the LEDGER DICE venue.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that ledger, engine, and storage
//! modules can depend on them without circular references.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Drops per whole XRP.
pub const DROPS_PER_XRP: u64 = 1_000_000;

/// Format a drop amount as whole XRP for log output.
pub fn drops_to_xrp(drops: u64) -> String {
    format!(
        "{}.{:06} XRP",
        drops / DROPS_PER_XRP,
        drops % DROPS_PER_XRP
    )
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

/// A wager derived from a validated incoming payment to the venue account.
///
/// Produced by the classifier, consumed once by the decision engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    /// The bettor's address (the payment's sender).
    pub account: String,
    pub amount_drops: u64,
    pub fee_drops: u64,
    pub ledger_index: u64,
    /// Transaction hash; unique for the venue's lifetime.
    pub tx_hash: String,
    pub timestamp: DateTime<Utc>,
    pub destination_tag: Option<u32>,
    /// Venue balance after this transaction was applied.
    pub bankroll_drops: u64,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bet {} from {} @ ledger {} (bankroll {})",
            self.tx_hash,
            drops_to_xrp(self.amount_drops),
            self.account,
            self.ledger_index,
            drops_to_xrp(self.bankroll_drops),
        )?;
        if let Some(tag) = self.destination_tag {
            write!(f, " tag={tag}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Outcome of evaluating a bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Refill/donation transfer: no game, no payout.
    Skip,
    /// Wager above the bankroll ceiling, returned untouched.
    RefundOversized,
    Win,
    Loss,
}

impl Outcome {
    /// Whether this outcome sends a payment back.
    pub fn pays_out(&self) -> bool {
        !matches!(self, Outcome::Skip)
    }

    /// Stable identifier used in storage and the monitor API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Skip => "SKIP",
            Outcome::RefundOversized => "REFUND_OVERSIZED",
            Outcome::Win => "WIN",
            Outcome::Loss => "LOSS",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SKIP" => Ok(Outcome::Skip),
            "REFUND_OVERSIZED" => Ok(Outcome::RefundOversized),
            "WIN" => Ok(Outcome::Win),
            "LOSS" => Ok(Outcome::Loss),
            _ => Err(anyhow::anyhow!("Unknown outcome: {s}")),
        }
    }
}

/// The decision engine's verdict for one bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutDecision {
    /// Hash of the bet this decision answers.
    pub bet_ref: String,
    /// Where the payout goes.
    pub destination: String,
    pub outcome: Outcome,
    pub payout_drops: u64,
    /// Fairness draw; absent when the game was short-circuited.
    pub fairness_value: Option<u64>,
    pub game_bits: u32,
}

impl fmt::Display for PayoutDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} → {} to {}",
            self.bet_ref,
            self.outcome,
            drops_to_xrp(self.payout_drops),
            self.destination,
        )?;
        if let Some(v) = self.fairness_value {
            write!(f, " (draw {v}/{}-bit)", self.game_bits)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Last processed ledger position, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "ledger")]
    pub ledger_index: u64,
    #[serde(rename = "hash")]
    pub tx_hash: String,
    /// Unix seconds.
    pub timestamp: i64,
}

impl Checkpoint {
    /// First-run checkpoint: ledger 0, no hash, stamped now.
    pub fn zero() -> Self {
        Self {
            ledger_index: 0,
            tx_hash: String::new(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Move the cursor to a processed bet. Returns false (and leaves the
    /// cursor alone) if the bet sits below the current ledger.
    pub fn advance(&mut self, bet: &Bet) -> bool {
        if bet.ledger_index < self.ledger_index {
            return false;
        }
        self.ledger_index = bet.ledger_index;
        self.tx_hash = bet.tx_hash.clone();
        self.timestamp = bet.timestamp.timestamp();
        true
    }

    pub fn is_first_run(&self) -> bool {
        self.ledger_index == 0 && self.tx_hash.is_empty()
    }

    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_first_run() {
            write!(f, "ledger 0 (fresh)")
        } else {
            write!(f, "ledger {} / {}", self.ledger_index, self.tx_hash)
        }
    }
}

// ---------------------------------------------------------------------------
// Venue statistics
// ---------------------------------------------------------------------------

/// Running counters for the venue since process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueStats {
    pub bets_seen: u64,
    pub wins: u64,
    pub losses: u64,
    pub refunds: u64,
    pub skipped: u64,
    /// Bets seen again after their payout was already dispatched.
    pub duplicates: u64,
    pub total_wagered_drops: u64,
    pub total_paid_drops: u64,
    pub last_bankroll_drops: u64,
    pub start_time: DateTime<Utc>,
}

impl Default for VenueStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VenueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bets={} (W{}/L{}/R{}/S{}) dup={} wagered={} paid={} net={} bankroll={}",
            self.bets_seen,
            self.wins,
            self.losses,
            self.refunds,
            self.skipped,
            self.duplicates,
            drops_to_xrp(self.total_wagered_drops),
            drops_to_xrp(self.total_paid_drops),
            self.house_net_drops(),
            drops_to_xrp(self.last_bankroll_drops),
        )
    }
}

impl VenueStats {
    pub fn new() -> Self {
        Self {
            bets_seen: 0,
            wins: 0,
            losses: 0,
            refunds: 0,
            skipped: 0,
            duplicates: 0,
            total_wagered_drops: 0,
            total_paid_drops: 0,
            last_bankroll_drops: 0,
            start_time: Utc::now(),
        }
    }

    /// Games actually played (win or loss).
    pub fn games_played(&self) -> u64 {
        self.wins + self.losses
    }

    /// Player win rate as a percentage. Returns 0.0 if no games played.
    pub fn win_rate(&self) -> f64 {
        let played = self.games_played();
        if played == 0 {
            0.0
        } else {
            (self.wins as f64 / played as f64) * 100.0
        }
    }

    /// Wagered minus paid, in drops. Negative when players are ahead.
    pub fn house_net_drops(&self) -> i128 {
        self.total_wagered_drops as i128 - self.total_paid_drops as i128
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the venue pipeline.
#[derive(Debug, thiserror::Error)]
pub enum VenueError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Classification error ({tx_hash}): {message}")]
    Classification { tx_hash: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Command rejected by node ({error}): {message}")]
    Command { error: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VenueError {
    pub fn classification(tx_hash: &str, message: impl Into<String>) -> Self {
        VenueError::Classification {
            tx_hash: tx_hash.to_string(),
            message: message.into(),
        }
    }

    /// Whether the session must be torn down and re-established.
    /// `Persistence` only propagates from the paid-ledger lookup; paying
    /// without it could double-pay, so it is fatal too.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            VenueError::Transport(_)
                | VenueError::Signing(_)
                | VenueError::Command { .. }
                | VenueError::Persistence(_)
        )
    }
}

pub type VenueResult<T> = std::result::Result<T, VenueError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
