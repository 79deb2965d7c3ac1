//! LEDGER DICE: provably-fair Hi-Lo venue on an XRP Ledger account stream.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod fairness;
pub mod ledger;
pub mod engine;
pub mod storage;
pub mod dashboard;
