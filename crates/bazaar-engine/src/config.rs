//! # Engine Configuration
//!
//! Register-level configuration: store identity, tax defaults and the
//! billing policy. Sessions copy these values at open time, so edits to the
//! config never change a sale that is already in progress.
//!
//! ## Load Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Configuration Loading                              │
//! │                                                                         │
//! │  1. Built-in defaults                                                   │
//! │  2. pos.toml (XDG config dir, or an explicit path)                      │
//! │  3. BAZAAR_* environment variables                                      │
//! │                                                                         │
//! │  Later sources override earlier ones; validation runs last.            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bazaar_core::validation::validate_tax_rate_bps;
use bazaar_core::{BillingPolicy, TaxRate};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Store Settings
// =============================================================================

/// Identity printed on receipts and used in folio charge descriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Store name as it appears on receipts.
    #[serde(default = "default_store_name")]
    pub name: String,

    /// Currency symbol for display (receipts, register UI).
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,

    /// ISO currency code.
    #[serde(default = "default_currency_code")]
    pub currency_code: String,
}

fn default_store_name() -> String {
    "Bazaar Store".to_string()
}

fn default_currency_symbol() -> String {
    "₹".to_string()
}

fn default_currency_code() -> String {
    "INR".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            name: default_store_name(),
            currency_symbol: default_currency_symbol(),
            currency_code: default_currency_code(),
        }
    }
}

// =============================================================================
// Tax Settings
// =============================================================================

/// Tax defaults applied to new carts and orders.
///
/// The rate is stored in basis points (1800 = 18%). Committed documents
/// freeze the rate they were computed with, so changing these values only
/// affects sales opened afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxSettings {
    /// Tax rate in basis points.
    #[serde(default = "default_tax_rate_bps")]
    pub rate_bps: u32,

    /// Whether tax is applied at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_tax_rate_bps() -> u32 {
    1800
}

fn default_true() -> bool {
    true
}

impl Default for TaxSettings {
    fn default() -> Self {
        TaxSettings {
            rate_bps: default_tax_rate_bps(),
            enabled: true,
        }
    }
}

// =============================================================================
// Billing Settings
// =============================================================================

/// Order billing behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingSettings {
    /// Which order statuses may join a billing run.
    #[serde(default)]
    pub policy: BillingPolicy,
}

// =============================================================================
// Main POS Configuration
// =============================================================================

/// Complete engine configuration.
///
/// ## Example Config File
/// ```toml
/// [store]
/// name = "Bazaar Cafe"
/// currency_symbol = "₹"
/// currency_code = "INR"
///
/// [tax]
/// rate_bps = 1800
/// enabled = true
///
/// [billing]
/// policy = "ready_required"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosConfig {
    /// Store identity.
    #[serde(default)]
    pub store: StoreSettings,

    /// Tax defaults.
    #[serde(default)]
    pub tax: TaxSettings,

    /// Billing behavior.
    #[serde(default)]
    pub billing: BillingSettings,
}

impl PosConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (pos.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading POS config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load POS config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "POS config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.store.name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "store name must not be empty".into(),
            ));
        }

        if self.store.currency_symbol.is_empty() {
            return Err(EngineError::InvalidConfig(
                "currency symbol must not be empty".into(),
            ));
        }

        validate_tax_rate_bps(self.tax.rate_bps)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("BAZAAR_STORE_NAME") {
            self.store.name = name;
        }

        if let Ok(symbol) = std::env::var("BAZAAR_CURRENCY_SYMBOL") {
            self.store.currency_symbol = symbol;
        }

        if let Ok(code) = std::env::var("BAZAAR_CURRENCY_CODE") {
            self.store.currency_code = code;
        }

        if let Ok(rate) = std::env::var("BAZAAR_TAX_RATE_BPS") {
            if let Ok(bps) = rate.parse::<u32>() {
                debug!(rate_bps = bps, "Overriding tax rate from environment");
                self.tax.rate_bps = bps;
            }
        }

        if let Ok(enabled) = std::env::var("BAZAAR_TAX_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.tax.enabled = true,
                "0" | "false" | "no" => self.tax.enabled = false,
                _ => warn!(value = %enabled, "Unknown tax enabled flag in environment"),
            }
        }

        if let Ok(policy) = std::env::var("BAZAAR_BILLING_POLICY") {
            match policy.to_lowercase().as_str() {
                "ready_required" | "ready" => {
                    self.billing.policy = BillingPolicy::ReadyRequired;
                }
                "any_active" | "any" => {
                    self.billing.policy = BillingPolicy::AnyActive;
                }
                _ => warn!(policy = %policy, "Unknown billing policy in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "bazaar", "pos").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("pos.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the store name.
    pub fn store_name(&self) -> &str {
        &self.store.name
    }

    /// Returns the configured tax rate.
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax.rate_bps)
    }

    /// Returns true if tax is applied.
    pub fn tax_enabled(&self) -> bool {
        self.tax.enabled
    }

    /// The rate to freeze into documents: the configured rate, or zero
    /// when tax is disabled.
    pub fn effective_tax_rate_bps(&self) -> u32 {
        if self.tax.enabled {
            self.tax.rate_bps
        } else {
            0
        }
    }

    /// Returns the billing policy.
    pub fn billing_policy(&self) -> BillingPolicy {
        self.billing.policy
    }
}
