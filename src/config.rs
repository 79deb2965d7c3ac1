//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (venue key, fairness secrets) are referenced by env-var name in
//! the config and resolved at runtime into `SecretString`s.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::decision::{CashoutPolicy, GamePolicy};
use crate::engine::orchestrator::ReconnectPolicy;
use crate::fairness::{validate_game_bits, SecretSchedule};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "LEDGER_DICE_CONFIG";

/// Top-level venue configuration. Loaded once, immutable afterwards.
#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    pub venue: VenueSection,
    pub game: GameConfig,
    pub fairness: FairnessConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub cashout: Option<CashoutConfig>,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueSection {
    pub name: String,
    /// Venue (game) account address.
    pub account: String,
    /// WebSocket URL of the ledger node.
    pub node_url: String,
    /// Env var holding the venue account's secret key.
    pub secret_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    #[serde(default = "default_game_bits")]
    pub game_bits: u32,
    /// Draws strictly below this value win.
    pub win_threshold: u64,
    /// Fraction of the stake paid on top of the stake on a win.
    pub payout_ratio: Decimal,
    /// Fixed amount returned on a loss.
    #[serde(default = "default_dust_drops")]
    pub dust_drops: u64,
    /// Destination tag marking refills/donations. Omit to disable.
    #[serde(default = "default_refill_tag")]
    pub refill_tag: Option<u32>,
    /// Bet limit is `bankroll / bet_limit_divisor`.
    #[serde(default = "default_bet_limit_divisor")]
    pub bet_limit_divisor: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FairnessConfig {
    /// Env var holding the base fairness secret.
    pub secret_env: String,
    /// Scheduled rotations on top of the base secret.
    #[serde(default)]
    pub schedule: Vec<SecretRotation>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretRotation {
    pub effective_from: DateTime<Utc>,
    pub secret_env: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    /// Node signs: the secret is sent alongside `tx_json`.
    #[default]
    Node,
    /// An external signing service returns a `tx_blob`.
    Remote,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SigningConfig {
    #[serde(default)]
    pub mode: SigningMode,
    pub remote_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: String,
    #[serde(default = "default_paid_db_url")]
    pub paid_db_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: default_checkpoint_path(),
            paid_db_url: default_paid_db_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backlog_timeout_ms")]
    pub backlog_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backlog_timeout_ms: default_backlog_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CashoutConfig {
    /// Bankroll kept on the venue account; anything above is swept.
    pub threshold_drops: u64,
    pub target_account: String,
    pub destination_tag: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8003,
        }
    }
}

fn default_game_bits() -> u32 {
    16
}

fn default_dust_drops() -> u64 {
    100
}

fn default_refill_tag() -> Option<u32> {
    Some(777)
}

fn default_bet_limit_divisor() -> u64 {
    5
}

fn default_checkpoint_path() -> String {
    "checkpoint.json".to_string()
}

fn default_paid_db_url() -> String {
    "sqlite://paid_bets.db?mode=rwc".to_string()
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backlog_timeout_ms() -> u64 {
    30_000
}

impl VenueConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: VenueConfig =
            toml::from_str(contents).context("Failed to parse venue config")?;
        config.validate()?;
        Ok(config)
    }

    /// Config path from `LEDGER_DICE_CONFIG`, else `config.toml`.
    pub fn default_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string())
    }

    /// Reject configurations the engine cannot run safely.
    pub fn validate(&self) -> Result<()> {
        validate_game_bits(self.game.game_bits)?;

        let space = 1u128 << self.game.game_bits;
        if u128::from(self.game.win_threshold) > space {
            anyhow::bail!(
                "win_threshold {} exceeds the {}-bit outcome space ({space})",
                self.game.win_threshold,
                self.game.game_bits
            );
        }
        if self.game.payout_ratio.is_sign_negative() {
            anyhow::bail!("payout_ratio must not be negative");
        }
        if self.game.bet_limit_divisor == 0 {
            anyhow::bail!("bet_limit_divisor must be at least 1");
        }
        if self.venue.account.trim().is_empty() {
            anyhow::bail!("venue.account must be set");
        }
        if self.signing.mode == SigningMode::Remote && self.signing.remote_url.is_none() {
            anyhow::bail!("signing.mode = \"remote\" requires signing.remote_url");
        }
        if let Some(cashout) = &self.cashout {
            if cashout.target_account == self.venue.account {
                anyhow::bail!("cashout.target_account must differ from the venue account");
            }
        }
        if self.reconnect.initial_delay_ms == 0
            || self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms
        {
            anyhow::bail!("reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms");
        }
        if self.reconnect.backlog_timeout_ms == 0 {
            anyhow::bail!("reconnect.backlog_timeout_ms must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The venue account's secret key.
    pub fn venue_secret(&self) -> Result<SecretString> {
        Self::resolve_env(&self.venue.secret_key_env).map(SecretString::new)
    }

    /// The fairness secret rotation schedule, secrets resolved from env.
    pub fn secret_schedule(&self) -> Result<SecretSchedule> {
        let base = Self::resolve_env(&self.fairness.secret_env)?;
        let mut entries = vec![(DateTime::<Utc>::MIN_UTC, SecretString::new(base))];
        for rotation in &self.fairness.schedule {
            let secret = Self::resolve_env(&rotation.secret_env)?;
            entries.push((rotation.effective_from, SecretString::new(secret)));
        }
        Ok(SecretSchedule::new(entries)?)
    }

    pub fn game_policy(&self) -> GamePolicy {
        GamePolicy {
            game_bits: self.game.game_bits,
            win_threshold: self.game.win_threshold,
            payout_ratio: self.game.payout_ratio,
            dust_drops: self.game.dust_drops,
            refill_tag: self.game.refill_tag,
            bet_limit_divisor: self.game.bet_limit_divisor,
        }
    }

    pub fn cashout_policy(&self) -> Option<CashoutPolicy> {
        self.cashout.as_ref().map(|c| CashoutPolicy {
            threshold_drops: c.threshold_drops,
            target_account: c.target_account.clone(),
            destination_tag: c.destination_tag,
        })
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect.initial_delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
        )
    }

    pub fn backlog_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect.backlog_timeout_ms)
    }
}
