//! Configuration for the trade engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Trade engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Trading rules
    pub trading: TradingConfig,

    /// Expiry sweep
    pub scheduler: SchedulerConfig,

    /// Admin arbitration
    pub arbitration: ArbitrationConfig,

    /// Event bus
    pub events: EventsConfig,

    /// Trade journal
    pub journal: JournalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "trade-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            trading: TradingConfig::default(),
            scheduler: SchedulerConfig::default(),
            arbitration: ArbitrationConfig::default(),
            events: EventsConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

/// Trading rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Buyer's payment window in seconds (default: 15 minutes)
    pub payment_window_secs: u64,

    /// Platform commission on release, in percent
    pub commission_percent: Decimal,

    /// Account credited with commission
    pub platform_account: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            payment_window_secs: 900,
            commission_percent: Decimal::from(2),
            platform_account: "platform".to_string(),
        }
    }
}

/// Expiry sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the periodic sweep
    pub enabled: bool,

    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 30,
        }
    }
}

/// Admin arbitration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Number of factors an admin must present
    pub required_factors: usize,

    /// Hex SHA-256 digest of each factor, in presentation order
    pub factor_digests: Vec<String>,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            required_factors: 3,
            factor_digests: Vec::new(),
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber buffer
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Trade journal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Append committed trades to the journal
    pub enabled: bool,

    /// Journal file
    pub path: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("./data/trades.journal"),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(secs) = std::env::var("TRADE_PAYMENT_WINDOW_SECS") {
            config.trading.payment_window_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("TRADE_PAYMENT_WINDOW_SECS: {}", e))
            })?;
        }

        if let Ok(percent) = std::env::var("TRADE_COMMISSION_PERCENT") {
            config.trading.commission_percent = percent.parse().map_err(|e| {
                crate::Error::Config(format!("TRADE_COMMISSION_PERCENT: {}", e))
            })?;
        }

        if let Ok(account) = std::env::var("TRADE_PLATFORM_ACCOUNT") {
            config.trading.platform_account = account;
        }

        if let Ok(secs) = std::env::var("TRADE_SWEEP_INTERVAL_SECS") {
            config.scheduler.sweep_interval_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("TRADE_SWEEP_INTERVAL_SECS: {}", e))
            })?;
        }

        if let Ok(digests) = std::env::var("TRADE_ADMIN_FACTOR_DIGESTS") {
            config.arbitration.factor_digests = digests
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }

        if let Ok(path) = std::env::var("TRADE_JOURNAL_PATH") {
            config.journal.enabled = true;
            config.journal.path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.trading.payment_window_secs == 0 {
            return Err(crate::Error::Config(
                "payment_window_secs must be > 0".to_string(),
            ));
        }

        let commission = self.trading.commission_percent;
        if commission < Decimal::ZERO || commission >= Decimal::ONE_HUNDRED {
            return Err(crate::Error::Config(format!(
                "commission_percent must be in [0, 100), got {}",
                commission
            )));
        }

        if self.trading.platform_account.trim().is_empty() {
            return Err(crate::Error::Config(
                "platform_account must not be empty".to_string(),
            ));
        }

        if self.scheduler.sweep_interval_secs == 0 {
            return Err(crate::Error::Config(
                "sweep_interval_secs must be > 0".to_string(),
            ));
        }

        if self.events.capacity == 0 {
            return Err(crate::Error::Config("events.capacity must be > 0".to_string()));
        }

        let arbitration = &self.arbitration;
        if arbitration.required_factors == 0 {
            return Err(crate::Error::Config(
                "required_factors must be > 0".to_string(),
            ));
        }

        // Empty digest list leaves arbitration locked
        if !arbitration.factor_digests.is_empty() {
            if arbitration.factor_digests.len() != arbitration.required_factors {
                return Err(crate::Error::Config(format!(
                    "expected {} factor digests, got {}",
                    arbitration.required_factors,
                    arbitration.factor_digests.len()
                )));
            }

            let mut seen = HashSet::new();
            for digest in &arbitration.factor_digests {
                let normalized = digest.to_ascii_lowercase();
                if normalized.len() != 64 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(crate::Error::Config(
                        "factor digests must be 64 hex characters (SHA-256)".to_string(),
                    ));
                }
                if !seen.insert(normalized) {
                    return Err(crate::Error::Config(
                        "factor digests must be distinct".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Payment window as a duration
    pub fn payment_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.trading.payment_window_secs as i64)
    }

    /// Sweep interval as a duration
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scheduler.sweep_interval_secs)
    }
}
