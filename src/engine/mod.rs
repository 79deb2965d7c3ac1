//! Core engine: bet → decision → payout.
//!
//! - `decision`: pure game rules and the cashout sweep
//! - `accountant`: venue P&L counters
//! - `orchestrator`: the serialized session loop tying ledger, engine and storage together

pub mod accountant;
pub mod decision;
pub mod orchestrator;
