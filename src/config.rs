//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::{collections::HashMap, str::FromStr, time::Duration};

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{db::LockPolicy, models::transaction::PaymentMethod};

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS`: pool size, defaults to 5
/// - `TRANSACTION_EXPIRY_HOURS`: payment window for new transactions, defaults to 24
/// - `MAX_LOCK_RETRIES`: retries on lock contention, defaults to 3
/// - `LOCK_TIMEOUT_MS`: per-statement lock wait inside locked sections, defaults to 5000
/// - `OUTBOUND_TIMEOUT_SECS`: payment gateway / messaging timeout, defaults to 5
/// - `EXPIRY_SWEEP_INTERVAL_SECS`: expiry sweep period, 0 disables, defaults to 60
/// - `CATALOG_CACHE_TTL_SECS`: product list cache TTL, defaults to 300
/// - `PAYMENT_GATEWAY_URL`, `PAYMENT_SERVER_KEY`: payment link API
/// - `PAYMENT_CALLBACK_SECRET`: HMAC secret for payment webhooks
/// - `PAYMENT_FEES`: flat fee per method, e.g. `gopay=1000,bca=4000`
/// - `WHATSAPP_API_URL`, `WHATSAPP_API_KEY`: messaging API
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_expiry_hours")]
    pub transaction_expiry_hours: i64,

    #[serde(default = "default_max_lock_retries")]
    pub max_lock_retries: u32,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_outbound_timeout_secs")]
    pub outbound_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub expiry_sweep_interval_secs: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub catalog_cache_ttl_secs: u64,

    pub payment_gateway_url: Option<String>,

    pub payment_server_key: Option<String>,

    #[serde(default)]
    pub payment_callback_secret: String,

    #[serde(default)]
    pub payment_fees: String,

    pub whatsapp_api_url: Option<String>,

    pub whatsapp_api_key: Option<String>,

    /// Parsed from `payment_fees` by [`Config::from_env`].
    #[serde(skip)]
    pub fee_schedule: FeeSchedule,
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_expiry_hours() -> i64 {
    24
}

fn default_max_lock_retries() -> u32 {
    3
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_outbound_timeout_secs() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_cache_ttl_secs() -> u64 {
    300
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] envy::Error),

    #[error("invalid PAYMENT_FEES entry `{0}`")]
    InvalidFee(String),

    #[error("invalid URL in {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing, values cannot be
    /// parsed, `PAYMENT_FEES` is malformed, or a collaborator URL is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validated()
    }

    /// Parse derived settings and check collaborator URLs.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.fee_schedule = FeeSchedule::parse(&self.payment_fees)?;

        for (name, value) in [
            ("PAYMENT_GATEWAY_URL", &self.payment_gateway_url),
            ("WHATSAPP_API_URL", &self.whatsapp_api_url),
        ] {
            if let Some(raw) = value.as_deref().filter(|v| !v.is_empty()) {
                url::Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { name, source })?;
            }
        }

        Ok(self)
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            lock_timeout_ms: self.lock_timeout_ms,
            max_retries: self.max_lock_retries,
        }
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout_secs)
    }

    pub fn transaction_expiry(&self) -> chrono::Duration {
        chrono::Duration::hours(self.transaction_expiry_hours)
    }
}

/// Flat payment fee per payment method. Methods without an entry are free.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeSchedule(HashMap<PaymentMethod, Decimal>);

impl FeeSchedule {
    /// Parse `method=amount` pairs separated by commas.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut fees = HashMap::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || ConfigError::InvalidFee(entry.to_string());

            let (method, amount) = entry.split_once('=').ok_or_else(invalid)?;
            let method = PaymentMethod::from_str(method.trim()).map_err(|_| invalid())?;
            let amount = Decimal::from_str(amount.trim()).map_err(|_| invalid())?;
            if amount.is_sign_negative() {
                return Err(invalid());
            }

            fees.insert(method, amount.round_dp(2));
        }

        Ok(Self(fees))
    }

    pub fn fee_for(&self, method: PaymentMethod) -> Decimal {
        self.0.get(&method).copied().unwrap_or(Decimal::ZERO)
    }
}
