//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::{BetLimits, RetryPolicy};
use crate::game::EmptyBookPolicy;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub settlement: SettlementSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GameConfig {
    /// Period length; must divide a day.
    pub period_secs: u32,
    pub tick_millis: u64,
    /// Placement closes this many seconds before each boundary.
    pub lockout_secs: u32,
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    pub empty_book: EmptyBookPolicy,
    pub history_limit: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            tick_millis: 1000,
            lockout_secs: 5,
            min_stake: dec!(1),
            max_stake: dec!(100000),
            empty_book: EmptyBookPolicy::Lowest,
            history_limit: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SettlementSettings {
    /// A Settling claim older than this may be taken over by another instance.
    pub claim_lease_secs: i64,
    pub credit_retries: u32,
    pub credit_backoff_millis: u64,
    pub placement_retries: u32,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            claim_lease_secs: 30,
            credit_retries: 5,
            credit_backoff_millis: 20,
            placement_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://wingo.db".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VerifierConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key_env: "WINGO_VERIFIER_KEY".into(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl GameConfig {
    pub fn bet_limits(&self, retries: u32) -> BetLimits {
        BetLimits {
            min_stake: self.min_stake,
            max_stake: self.max_stake,
            lockout_secs: self.lockout_secs,
            retries,
        }
    }
}

impl SettlementSettings {
    pub fn credit_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.credit_retries,
            backoff: Duration::from_millis(self.credit_backoff_millis),
        }
    }

    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_lease_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let g = &self.game;
        if g.period_secs == 0 || 86_400 % g.period_secs != 0 {
            anyhow::bail!("game.period_secs ({}) must divide a day", g.period_secs);
        }
        if g.lockout_secs >= g.period_secs {
            anyhow::bail!(
                "game.lockout_secs ({}) must be shorter than the period ({})",
                g.lockout_secs,
                g.period_secs
            );
        }
        if g.min_stake <= Decimal::ZERO || g.min_stake > g.max_stake {
            anyhow::bail!("game stake bounds [{}, {}] are invalid", g.min_stake, g.max_stake);
        }
        if self.settlement.claim_lease_secs <= 0 {
            anyhow::bail!("settlement.claim_lease_secs must be positive");
        }
        if self.verifier.enabled && self.verifier.endpoint.is_empty() {
            anyhow::bail!("verifier.endpoint is required when the verifier is enabled");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
