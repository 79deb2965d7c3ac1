//! Payout decision engine.
//!
//! Pure mapping from a classified `Bet` to a `PayoutDecision`. Rules apply
//! in priority order: refill skip, oversized refund, then the Hi-Lo draw.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, info};

use crate::fairness::{compute_outcome, FairnessSecretSource};
use crate::types::{drops_to_xrp, Bet, Outcome, PayoutDecision, VenueError, VenueResult};

// ---------------------------------------------------------------------------
// Game policy
// ---------------------------------------------------------------------------

/// Game rules. Built from `[game]` in the config.
#[derive(Debug, Clone, PartialEq)]
pub struct GamePolicy {
    pub game_bits: u32,
    /// Draws strictly below this value win.
    pub win_threshold: u64,
    pub payout_ratio: Decimal,
    pub dust_drops: u64,
    pub refill_tag: Option<u32>,
    pub bet_limit_divisor: u64,
}

impl Default for GamePolicy {
    fn default() -> Self {
        Self {
            game_bits: 16,
            win_threshold: 32_768, // even odds on 16 bits
            payout_ratio: dec!(0.9801),
            dust_drops: 100,
            refill_tag: Some(777),
            bet_limit_divisor: 5,
        }
    }
}

impl GamePolicy {
    /// Largest wager the bankroll accepts.
    pub fn bet_limit(&self, bankroll_drops: u64) -> u64 {
        bankroll_drops / self.bet_limit_divisor.max(1)
    }

    /// Stake returned plus `floor(stake * payout_ratio)`.
    pub fn win_payout(&self, amount_drops: u64) -> VenueResult<u64> {
        let winnings = Decimal::from(amount_drops)
            .checked_mul(self.payout_ratio)
            .and_then(|w| w.floor().to_u64())
            .ok_or_else(|| {
                VenueError::Config(format!(
                    "payout for {amount_drops} drops at ratio {} is out of range",
                    self.payout_ratio
                ))
            })?;
        amount_drops.checked_add(winnings).ok_or_else(|| {
            VenueError::Config(format!("payout for {amount_drops} drops overflows"))
        })
    }

    fn is_refill(&self, bet: &Bet) -> bool {
        matches!((self.refill_tag, bet.destination_tag), (Some(r), Some(t)) if r == t)
    }
}

/// Decide one bet against `secret`.
pub fn decide(bet: &Bet, policy: &GamePolicy, secret: &str) -> VenueResult<PayoutDecision> {
    let mut decision = PayoutDecision {
        bet_ref: bet.tx_hash.clone(),
        destination: bet.account.clone(),
        outcome: Outcome::Skip,
        payout_drops: 0,
        fairness_value: None,
        game_bits: policy.game_bits,
    };

    if policy.is_refill(bet) {
        debug!(tx_hash = %bet.tx_hash, "Refill transfer, no game");
        return Ok(decision);
    }

    let limit = policy.bet_limit(bet.bankroll_drops);
    if bet.amount_drops > limit {
        info!(
            tx_hash = %bet.tx_hash,
            amount = %drops_to_xrp(bet.amount_drops),
            limit = %drops_to_xrp(limit),
            "Bet exceeds limit, refunding"
        );
        decision.outcome = Outcome::RefundOversized;
        decision.payout_drops = bet.amount_drops;
        return Ok(decision);
    }

    let value = compute_outcome(&bet.tx_hash, secret, policy.game_bits)?;
    decision.fairness_value = Some(value);

    if value < policy.win_threshold {
        decision.outcome = Outcome::Win;
        decision.payout_drops = policy.win_payout(bet.amount_drops)?;
    } else {
        decision.outcome = Outcome::Loss;
        decision.payout_drops = policy.dust_drops;
    }

    Ok(decision)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Policy plus secret schedule; picks the secret by bet time.
pub struct DecisionEngine {
    policy: GamePolicy,
    secrets: Arc<dyn FairnessSecretSource>,
}

impl DecisionEngine {
    pub fn new(policy: GamePolicy, secrets: Arc<dyn FairnessSecretSource>) -> Self {
        Self { policy, secrets }
    }

    pub fn policy(&self) -> &GamePolicy {
        &self.policy
    }

    pub fn decide(&self, bet: &Bet) -> VenueResult<PayoutDecision> {
        let secret = self.secrets.current_secret(bet.timestamp);
        decide(bet, &self.policy, secret.expose_secret())
    }
}

// ---------------------------------------------------------------------------
// Cashout
// ---------------------------------------------------------------------------

/// Sweeps bankroll above a threshold to a cold account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashoutPolicy {
    pub threshold_drops: u64,
    pub target_account: String,
    pub destination_tag: Option<u32>,
}

impl CashoutPolicy {
    /// Amount to sweep once `payout_drops` has left a `bankroll_drops`
    /// balance. None when nothing exceeds the threshold.
    pub fn sweep_amount(&self, bankroll_drops: u64, payout_drops: u64) -> Option<u64> {
        let remaining = bankroll_drops.saturating_sub(payout_drops);
        (remaining > self.threshold_drops).then(|| remaining - self.threshold_drops)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
