//! Venue orchestrator: the single serialized event loop.
//!
//! One session: connect → replay backlog from the checkpoint (paging on
//! `marker`) → subscribe → handle live events until the transport fails.
//! Every bet goes paid-ledger check → decide → sign → submit → record →
//! stats → checkpoint, fully, before the next message is read.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::dashboard::{AppState, DecisionLogEntry};
use crate::engine::accountant::Accountant;
use crate::engine::decision::{CashoutPolicy, DecisionEngine};
use crate::ledger::classifier::{classify, classify_history};
use crate::ledger::client::{StreamClient, StreamState};
use crate::ledger::protocol::{LedgerEvent, PaymentTx};
use crate::ledger::signer::PaymentSigner;
use crate::storage::paid::{cashout_key, PaidLedger, PaidRecord};
use crate::storage::save_checkpoint;
use crate::types::{
    drops_to_xrp, Bet, Checkpoint, PayoutDecision, VenueError, VenueResult, VenueStats,
};

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Capped exponential backoff between sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// Delay before the next attempt: initial, doubling, capped at max.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Called once a session reaches LIVE_SUBSCRIBED.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

/// Static venue wiring, resolved from config at startup.
#[derive(Debug, Clone)]
pub struct VenueSettings {
    pub account: String,
    pub checkpoint_path: String,
    pub cashout: Option<CashoutPolicy>,
    pub reconnect: ReconnectPolicy,
    /// Longest wait for an `account_tx` reply before the session is dropped.
    pub backlog_timeout: Duration,
}

pub struct Venue {
    settings: VenueSettings,
    client: StreamClient,
    engine: DecisionEngine,
    signer: Box<dyn PaymentSigner>,
    paid: PaidLedger,
    checkpoint: Checkpoint,
    stats: VenueStats,
    /// Submit id → paid-ledger key, awaiting the node's engine_result.
    pending: HashMap<u64, String>,
    monitor: Option<AppState>,
}

impl Venue {
    pub fn new(
        settings: VenueSettings,
        client: StreamClient,
        engine: DecisionEngine,
        signer: Box<dyn PaymentSigner>,
        paid: PaidLedger,
        checkpoint: Checkpoint,
    ) -> Self {
        Self {
            settings,
            client,
            engine,
            signer,
            paid,
            checkpoint,
            stats: VenueStats::new(),
            pending: HashMap::new(),
            monitor: None,
        }
    }

    /// Publish state snapshots to the monitor API.
    pub fn with_monitor(mut self, monitor: AppState) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn stats(&self) -> &VenueStats {
        &self.stats
    }

    pub fn state(&self) -> StreamState {
        self.client.state()
    }

    pub fn paid_ledger(&self) -> &PaidLedger {
        &self.paid
    }

    /// Run sessions forever, backing off between failures.
    pub async fn run(&mut self) {
        loop {
            match self.run_session().await {
                Ok(()) => warn!("Ledger session ended"),
                Err(e) => warn!(error = %e, "Ledger session failed"),
            }
            self.client.drop_connection().await;
            self.publish_state().await;

            let delay = self.settings.reconnect.next_delay();
            info!(
                attempt = self.settings.reconnect.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection lifetime. Returns when the transport fails or a
    /// session-fatal error occurs.
    pub async fn run_session(&mut self) -> VenueResult<()> {
        // Results for submits from a dead session never arrive.
        self.pending.clear();

        self.client.connect().await?;
        self.publish_state().await;

        self.replay_backlog().await?;

        let account = self.settings.account.clone();
        self.client.subscribe(&account).await?;
        self.settings.reconnect.reset();
        self.publish_state().await;
        info!(
            checkpoint = %self.checkpoint,
            stats = %self.stats,
            "Live on venue account"
        );

        loop {
            let event = self.client.next_event().await?;
            self.handle_event(event).await?;
        }
    }

    /// Request history from the checkpoint's ledger and settle every bet
    /// in it, in ledger order, before going live.
    async fn replay_backlog(&mut self) -> VenueResult<()> {
        let account = self.settings.account.clone();
        let from_ledger = self.checkpoint.ledger_index;
        let mut marker = None;
        let mut pages = 0u32;
        let mut replayed = 0usize;

        loop {
            let request_id = self
                .client
                .request_backlog(&account, from_ledger, marker.take())
                .await?;

            let timeout = self.settings.backlog_timeout;
            let (entries, next_marker, discarded) = loop {
                let event = tokio::time::timeout(timeout, self.client.next_event())
                    .await
                    .map_err(|_| {
                        VenueError::Transport(format!(
                            "no account_tx reply within {}ms",
                            timeout.as_millis()
                        ))
                    })??;
                match event {
                    LedgerEvent::History {
                        id: Some(id),
                        entries,
                        marker,
                        discarded,
                    } if id == request_id => {
                        break (entries, marker, discarded);
                    }
                    LedgerEvent::CommandError { id: Some(id), error, message } if id == request_id => {
                        return Err(VenueError::Command { error, message });
                    }
                    LedgerEvent::Transaction(msg) => {
                        debug!(tx_hash = %msg.transaction.hash, "Live transaction before subscribe, ignored");
                    }
                    other => self.handle_event(other).await?,
                }
            };

            if pages == 0 {
                self.client.transition(StreamState::ReplayingBacklog);
                self.publish_state().await;
            }
            pages += 1;

            let bets = classify_history(&entries, &account);
            info!(
                page = pages,
                entries = entries.len(),
                discarded,
                bets = bets.len(),
                "Backlog page"
            );
            for bet in bets {
                self.settle(bet).await?;
                replayed += 1;
            }

            match next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        info!(pages, replayed, checkpoint = %self.checkpoint, "Backlog replayed");
        Ok(())
    }

    async fn handle_event(&mut self, event: LedgerEvent) -> VenueResult<()> {
        match event {
            LedgerEvent::Transaction(msg) => {
                if let Some(bet) = classify(&msg, &self.settings.account) {
                    self.settle(bet).await?;
                }
            }
            LedgerEvent::SubmitResult {
                id,
                engine_result,
                message,
                tx_hash,
            } => {
                self.record_submit_result(id, &engine_result, &message, tx_hash.as_deref())
                    .await;
            }
            LedgerEvent::CommandError { id, error, message } => {
                if let Some(key) = id.and_then(|id| self.pending.remove(&id)) {
                    // The payout is recorded as dispatched; it is not retried.
                    error!(%key, %error, %message, "Node rejected payout submit");
                    if let Err(e) = self.paid.mark_result(&key, &error).await {
                        warn!(%key, error = ?e, "Failed to store submit error");
                    }
                } else {
                    return Err(VenueError::Command { error, message });
                }
            }
            LedgerEvent::Ack { id } => debug!(?id, "Command acknowledged"),
            LedgerEvent::History { id, .. } => debug!(?id, "Unsolicited history page ignored"),
            LedgerEvent::Other { kind } => debug!(%kind, "Ignoring stream message"),
        }
        Ok(())
    }

    /// Handle a bet, logging errors that only concern this bet.
    async fn settle(&mut self, bet: Bet) -> VenueResult<()> {
        let tx_hash = bet.tx_hash.clone();
        match self.handle_bet(bet).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_session_fatal() => Err(e),
            Err(e) => {
                error!(%tx_hash, error = %e, "Bet not settled");
                Ok(())
            }
        }
    }

    /// Settle one bet. Returns the decision, or None when the payout was
    /// already dispatched in an earlier session.
    pub async fn handle_bet(&mut self, bet: Bet) -> VenueResult<Option<PayoutDecision>> {
        info!(%bet, "Bet received");

        let already_paid = self
            .paid
            .contains(&bet.tx_hash)
            .await
            .map_err(|e| VenueError::Persistence(format!("{e:#}")))?;
        if already_paid {
            info!(tx_hash = %bet.tx_hash, "Payout already dispatched, skipping");
            Accountant::record_duplicate(&mut self.stats, &bet);
            self.advance_checkpoint(&bet).await;
            self.publish_stats().await;
            return Ok(None);
        }

        let decision = self.engine.decide(&bet)?;
        info!(%decision, "Decision");

        if decision.outcome.pays_out() {
            let submit_id = self
                .dispatch(&decision.destination, decision.payout_drops, None)
                .await?;
            let record = PaidRecord::from_decision(&decision, bet.ledger_index, submit_id);
            self.record_paid(record, submit_id).await;
            self.maybe_cashout(&bet, &decision).await?;
        }

        Accountant::record(&mut self.stats, &bet, &decision);
        self.advance_checkpoint(&bet).await;
        self.publish_decision(&bet, &decision).await;
        Ok(Some(decision))
    }

    /// Sign and submit one payment. Returns the submit request id.
    async fn dispatch(
        &mut self,
        destination: &str,
        drops: u64,
        destination_tag: Option<u32>,
    ) -> VenueResult<u64> {
        let tx = PaymentTx::new(&self.settings.account, destination, drops, destination_tag);
        let signed = self
            .signer
            .sign(&tx)
            .await
            .map_err(|e| VenueError::Signing(format!("{e:#}")))?;
        let id = self.client.submit(signed).await?;
        info!(id, destination, amount = %drops_to_xrp(drops), "Payment submitted");
        Ok(id)
    }

    /// Best effort: the payment is already on the wire.
    async fn record_paid(&mut self, record: PaidRecord, submit_id: u64) {
        match self.paid.record(&record).await {
            Ok(_) => {
                self.pending.insert(submit_id, record.key);
            }
            Err(e) => error!(
                key = %record.key,
                error = ?e,
                "Payout sent but not recorded; a replay of this bet would pay again"
            ),
        }
    }

    /// Sweep bankroll above the cashout threshold after a payout.
    async fn maybe_cashout(&mut self, bet: &Bet, decision: &PayoutDecision) -> VenueResult<()> {
        let Some(cashout) = self.settings.cashout.clone() else {
            return Ok(());
        };
        let Some(amount) = cashout.sweep_amount(bet.bankroll_drops, decision.payout_drops) else {
            return Ok(());
        };

        let key = cashout_key(&bet.tx_hash);
        let swept = self
            .paid
            .contains(&key)
            .await
            .map_err(|e| VenueError::Persistence(format!("{e:#}")))?;
        if swept {
            return Ok(());
        }

        info!(
            tx_hash = %bet.tx_hash,
            amount = %drops_to_xrp(amount),
            target = %cashout.target_account,
            "Sweeping bankroll above threshold"
        );
        let submit_id = self
            .dispatch(&cashout.target_account, amount, cashout.destination_tag)
            .await?;
        let record = PaidRecord::cashout(
            &bet.tx_hash,
            &cashout.target_account,
            amount,
            bet.ledger_index,
            submit_id,
        );
        self.record_paid(record, submit_id).await;
        Ok(())
    }

    /// Move the cursor to `bet` and persist it. Write failures are logged.
    async fn advance_checkpoint(&mut self, bet: &Bet) {
        if !self.checkpoint.advance(bet) {
            debug!(
                ledger = bet.ledger_index,
                cursor = self.checkpoint.ledger_index,
                "Bet below checkpoint, cursor unchanged"
            );
            return;
        }
        if let Err(e) = save_checkpoint(&self.checkpoint, Some(&self.settings.checkpoint_path)) {
            error!(error = ?e, "Failed to persist checkpoint");
        }
    }

    async fn record_submit_result(
        &mut self,
        id: Option<u64>,
        engine_result: &str,
        message: &str,
        tx_hash: Option<&str>,
    ) {
        let key = id.and_then(|id| self.pending.remove(&id));
        let accepted = engine_result.starts_with("tes") || engine_result == "terQUEUED";

        if accepted {
            info!(?id, ?key, engine_result, ?tx_hash, "Payment accepted");
        } else {
            warn!(?id, ?key, engine_result, message, "Payment not applied");
        }

        if let Some(key) = key {
            if let Err(e) = self.paid.mark_result(&key, engine_result).await {
                warn!(%key, error = ?e, "Failed to store submit result");
            }
        }
    }

    /// Orderly stop: close the connection and flush the checkpoint.
    pub async fn shutdown(&mut self) {
        self.client.disconnect().await;
        if let Err(e) = save_checkpoint(&self.checkpoint, Some(&self.settings.checkpoint_path)) {
            error!(error = ?e, "Failed to persist checkpoint on shutdown");
        }
        self.publish_state().await;
        info!(checkpoint = %self.checkpoint, stats = %self.stats, "Venue stopped");
    }

    // -- monitor snapshots --

    async fn publish_state(&self) {
        if let Some(monitor) = &self.monitor {
            *monitor.stream_state.write().await = self.client.state();
        }
    }

    async fn publish_stats(&self) {
        if let Some(monitor) = &self.monitor {
            *monitor.stats.write().await = self.stats.clone();
            *monitor.checkpoint.write().await = self.checkpoint.clone();
        }
    }

    async fn publish_decision(&self, bet: &Bet, decision: &PayoutDecision) {
        if let Some(monitor) = &self.monitor {
            monitor
                .push_decision(DecisionLogEntry::new(decision, bet.ledger_index, bet.amount_drops))
                .await;
        }
        self.publish_stats().await;
    }
}
