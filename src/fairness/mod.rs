//! Provably-fair outcome derivation.
//!
//! The draw for a bet is `HMAC-SHA256(key = fairness secret, msg = tx hash)`,
//! truncated to the first `game_bits / 4` hex characters and read as a
//! base-16 integer. Anyone holding the secret can recompute it once the
//! secret is published, which is what makes the venue auditable.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::debug;

use crate::types::{VenueError, VenueResult};

type HmacSha256 = Hmac<Sha256>;

/// Widest game the engine supports (one `u64` worth of hex).
pub const MAX_GAME_BITS: u32 = 64;

/// Check that a game width can be sliced out of a hex digest.
pub fn validate_game_bits(game_bits: u32) -> VenueResult<()> {
    if game_bits == 0 || game_bits % 4 != 0 || game_bits > MAX_GAME_BITS {
        return Err(VenueError::Config(format!(
            "game_bits must be a non-zero multiple of 4 up to {MAX_GAME_BITS}, got {game_bits}"
        )));
    }
    Ok(())
}

/// Full lowercase hex HMAC-SHA256 digest of `tx_hash` under `secret`.
pub fn fairness_digest(tx_hash: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(tx_hash.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Deterministic outcome in `[0, 2^game_bits)` for a transaction hash.
pub fn compute_outcome(tx_hash: &str, secret: &str, game_bits: u32) -> VenueResult<u64> {
    validate_game_bits(game_bits)?;

    let digest = fairness_digest(tx_hash, secret);
    let num_chars = (game_bits / 4) as usize;
    let slice = &digest[..num_chars];

    let value = u64::from_str_radix(slice, 16)
        .map_err(|e| VenueError::Parse(format!("fairness slice {slice}: {e}")))?;

    debug!(
        tx_hash,
        digest = %digest.to_uppercase(),
        slice = %slice.to_uppercase(),
        value,
        game_bits,
        "Fairness draw"
    );

    Ok(value)
}

// ---------------------------------------------------------------------------
// Secret rotation
// ---------------------------------------------------------------------------

/// Source of the fairness secret in effect at a given moment.
///
/// The venue publishes (or rotates) its secret on a schedule; the engine
/// never hardcodes it, it only asks for the secret current at a bet's time.
pub trait FairnessSecretSource: Send + Sync {
    fn current_secret(&self, at: DateTime<Utc>) -> &SecretString;
}

/// Rotation schedule: each secret applies from its `effective_from`
/// until the next entry takes over.
pub struct SecretSchedule {
    /// Sorted ascending by effective time. Never empty.
    entries: Vec<(DateTime<Utc>, SecretString)>,
}

impl SecretSchedule {
    /// Build a schedule. At least one entry is required.
    pub fn new(mut entries: Vec<(DateTime<Utc>, SecretString)>) -> VenueResult<Self> {
        if entries.is_empty() {
            return Err(VenueError::Config(
                "fairness secret schedule has no entries".into(),
            ));
        }
        entries.sort_by_key(|(from, _)| *from);
        Ok(Self { entries })
    }

    /// A schedule with one secret that never rotates.
    pub fn fixed(secret: SecretString) -> Self {
        Self {
            entries: vec![(DateTime::<Utc>::MIN_UTC, secret)],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FairnessSecretSource for SecretSchedule {
    fn current_secret(&self, at: DateTime<Utc>) -> &SecretString {
        self.entries
            .iter()
            .rev()
            .find(|(from, _)| *from <= at)
            .map(|(_, secret)| secret)
            // Before the first rotation: the earliest secret applies.
            .unwrap_or(&self.entries[0].1)
    }
}

/// Convenience for callers holding a schedule and a bet time.
pub fn compute_outcome_at(
    source: &dyn FairnessSecretSource,
    tx_hash: &str,
    at: DateTime<Utc>,
    game_bits: u32,
) -> VenueResult<u64> {
    compute_outcome(tx_hash, source.current_secret(at).expose_secret(), game_bits)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
