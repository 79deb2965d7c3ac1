//! Integration tests: the venue driven against a scripted ledger node.

mod mock_ledger;
mod venue_flow;
