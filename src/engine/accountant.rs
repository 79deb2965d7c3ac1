//! Accountant: venue P&L counters.
//!
//! Folds each processed bet and its decision into `VenueStats`.

use tracing::{debug, info};

use crate::types::{drops_to_xrp, Bet, Outcome, PayoutDecision, VenueStats};

pub struct Accountant;

impl Accountant {
    /// Record a decided bet. Skipped transfers are counted but not wagered.
    pub fn record(stats: &mut VenueStats, bet: &Bet, decision: &PayoutDecision) {
        stats.bets_seen += 1;
        stats.last_bankroll_drops = bet.bankroll_drops;

        match decision.outcome {
            Outcome::Skip => {
                stats.skipped += 1;
                debug!(tx_hash = %bet.tx_hash, "Refill counted");
                return;
            }
            Outcome::RefundOversized => stats.refunds += 1,
            Outcome::Win => stats.wins += 1,
            Outcome::Loss => stats.losses += 1,
        }

        stats.total_wagered_drops = stats.total_wagered_drops.saturating_add(bet.amount_drops);
        stats.total_paid_drops = stats.total_paid_drops.saturating_add(decision.payout_drops);

        info!(
            tx_hash = %bet.tx_hash,
            outcome = %decision.outcome,
            payout = %drops_to_xrp(decision.payout_drops),
            house_net = stats.house_net_drops(),
            "Bet settled"
        );
    }

    /// A bet whose payout was already dispatched in an earlier session.
    pub fn record_duplicate(stats: &mut VenueStats, bet: &Bet) {
        stats.duplicates += 1;
        stats.last_bankroll_drops = bet.bankroll_drops;
    }
}
