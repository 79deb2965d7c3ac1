//! Monitor API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`;
//! the venue loop publishes snapshots into it after every bet.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::ledger::client::StreamState;
use crate::types::{Checkpoint, Outcome, PayoutDecision, VenueStats};

/// Decisions kept for `/api/decisions`.
pub const DECISION_LOG_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub venue_name: String,
    pub account: String,
    pub stats: RwLock<VenueStats>,
    pub stream_state: RwLock<StreamState>,
    pub checkpoint: RwLock<Checkpoint>,
    pub recent_decisions: RwLock<VecDeque<DecisionLogEntry>>,
}

impl DashboardState {
    pub fn new(venue_name: impl Into<String>, account: impl Into<String>, checkpoint: Checkpoint) -> Self {
        Self {
            venue_name: venue_name.into(),
            account: account.into(),
            stats: RwLock::new(VenueStats::new()),
            stream_state: RwLock::new(StreamState::Disconnected),
            checkpoint: RwLock::new(checkpoint),
            recent_decisions: RwLock::new(VecDeque::with_capacity(DECISION_LOG_CAPACITY)),
        }
    }

    /// Append a decision, evicting the oldest beyond capacity.
    pub async fn push_decision(&self, entry: DecisionLogEntry) {
        let mut log = self.recent_decisions.write().await;
        if log.len() == DECISION_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(entry);
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub venue: String,
    pub account: String,
    pub stream_state: StreamState,
    pub bets_seen: u64,
    pub wins: u64,
    pub losses: u64,
    pub refunds: u64,
    pub skipped: u64,
    pub duplicates: u64,
    pub win_rate: f64,
    pub total_wagered_drops: u64,
    pub total_paid_drops: u64,
    /// String: may exceed JSON's safe integer range.
    pub house_net_drops: String,
    pub bankroll_drops: u64,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionLogEntry {
    pub timestamp: String,
    pub bet_ref: String,
    pub ledger_index: u64,
    pub destination: String,
    pub amount_drops: u64,
    pub outcome: Outcome,
    pub payout_drops: u64,
    pub fairness_value: Option<u64>,
    pub game_bits: u32,
}

impl DecisionLogEntry {
    pub fn new(decision: &PayoutDecision, ledger_index: u64, amount_drops: u64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            bet_ref: decision.bet_ref.clone(),
            ledger_index,
            destination: decision.destination.clone(),
            amount_drops,
            outcome: decision.outcome,
            payout_drops: decision.payout_drops,
            fairness_value: decision.fairness_value,
            game_bits: decision.game_bits,
        }
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

pub type AppState = Arc<DashboardState>;

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.stats.read().await;
    let stream_state = *state.stream_state.read().await;

    Json(StatusResponse {
        venue: state.venue_name.clone(),
        account: state.account.clone(),
        stream_state,
        bets_seen: stats.bets_seen,
        wins: stats.wins,
        losses: stats.losses,
        refunds: stats.refunds,
        skipped: stats.skipped,
        duplicates: stats.duplicates,
        win_rate: stats.win_rate(),
        total_wagered_drops: stats.total_wagered_drops,
        total_paid_drops: stats.total_paid_drops,
        house_net_drops: stats.house_net_drops().to_string(),
        bankroll_drops: stats.last_bankroll_drops,
        uptime_secs: stats.uptime().num_seconds(),
    })
}

/// GET /api/decisions
pub async fn get_decisions(State(state): State<AppState>) -> Json<Vec<DecisionLogEntry>> {
    let log = state.recent_decisions.read().await;
    Json(log.iter().cloned().collect())
}

/// GET /api/checkpoint
pub async fn get_checkpoint(State(state): State<AppState>) -> Json<Checkpoint> {
    Json(state.checkpoint.read().await.clone())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
