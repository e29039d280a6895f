//! Ledger configuration.
//!
//! Loaded from an optional YAML file and `TINDA_LEDGER__*` environment
//! variables, later sources overriding earlier ones.

use std::time::Duration;

use serde::Deserialize;

use crate::commission::CommissionRate;
use crate::currency::Currency;
use crate::error::{LedgerError, RateTarget};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "ledger.yaml";
/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "TINDA_LEDGER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TINDA_LEDGER";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base currency code; every amount is in its minor unit.
    pub currency: String,
    pub currency_decimals: u8,
    /// Global rate seeded when none has been stored yet.
    pub default_commission_rate: f64,
    pub commission_cache_ttl_secs: u64,
    /// Upper bound on every storage call.
    pub storage_timeout_ms: u64,
    /// Fail payout creation early when the wallet cannot cover it.
    pub check_balance_on_payout_create: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: "PHP".to_string(),
            currency_decimals: 2,
            default_commission_rate: 0.01,
            commission_cache_ttl_secs: 300,
            storage_timeout_ms: 5_000,
            check_balance_on_payout_create: false,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `ledger.yaml` in the current directory (if present)
    /// 2. the file at `path` (required if given)
    /// 3. the file named by `TINDA_LEDGER_CONFIG` (required if set)
    /// 4. `TINDA_LEDGER__*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn currency(&self) -> Currency {
        Currency::new(&self.currency, self.currency_decimals)
    }

    pub fn default_commission_rate(&self) -> Result<CommissionRate, LedgerError> {
        CommissionRate::new(self.default_commission_rate, RateTarget::Global)
    }

    pub fn commission_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.commission_cache_ttl_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.currency(), Currency::php());
        assert_eq!(config.default_commission_rate().unwrap().value(), 0.01);
        assert_eq!(config.commission_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.storage_timeout(), Duration::from_secs(5));
        assert!(!config.check_balance_on_payout_create);
    }

    #[test]
    fn test_load_from_file_keeps_unset_defaults() {
        let path = std::env::temp_dir().join(format!("tinda-ledger-{}.yaml", uuid::Uuid::now_v7()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "default_commission_rate: 0.05").unwrap();
        writeln!(file, "check_balance_on_payout_create: true").unwrap();
        drop(file);

        let config = LedgerConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.default_commission_rate, 0.05);
        assert!(config.check_balance_on_payout_create);
        assert_eq!(config.commission_cache_ttl_secs, 300);
        assert_eq!(config.currency, "PHP");
    }

    #[test]
    fn test_out_of_range_default_rate_is_rejected() {
        let config = LedgerConfig {
            default_commission_rate: 2.0,
            ..LedgerConfig::default()
        };
        assert!(matches!(
            config.default_commission_rate(),
            Err(LedgerError::InvalidRate { .. })
        ));
    }
}
