//! # Engine Configuration
//!
//! Configuration management for the transaction engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     APOTHECARY_DB_PATH=/srv/apothecary/back-office.db                  │
//! │     APOTHECARY_EMAIL_ENABLED=true                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/apothecary/engine.toml (Linux)                           │
//! │     ~/Library/Application Support/com.apothecary.back-office/… (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [store]
//! name = "Green Leaf Apothecary"
//! address = "12 Market Street"
//! phone = "+44 20 7946 0000"
//!
//! [database]
//! path = "./data/apothecary.db"
//! max_connections = 5
//!
//! [invoice]
//! storage_root = "./data"            # invoices land in ./data/invoices/
//! public_base_url = "https://files.example.com"
//!
//! [email]
//! enabled = true
//! sender = "invoices@example.com"
//!
//! [discounts.staff]
//! max_percent_bps = 1000             # 10%
//! max_amount_cents = 2000
//!
//! [discounts.manager]
//! max_percent_bps = 3000
//! max_amount_cents = 10000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use apothecary_core::invoice::InvoiceIssuer;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Store
// =============================================================================

/// The business printed on every invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_name")]
    pub name: String,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,
}

fn default_store_name() -> String {
    "Apothecary".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            name: default_store_name(),
            address: None,
            phone: None,
        }
    }
}

impl StoreConfig {
    pub fn issuer(&self) -> InvoiceIssuer {
        InvoiceIssuer {
            name: self.name.clone(),
            address: self.address.clone(),
            phone: self.phone.clone(),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./apothecary.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Invoice Storage
// =============================================================================

/// Where rendered invoices are written and how they are linked.
///
/// ```text
/// storage_root/
/// └── invoices/
///     └── TXN-20260314-0007_Jane_Doe_14032026.pdf
///
/// download URL = public_base_url + "/" + file name
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSettings {
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_storage_root() -> PathBuf {
    directories::ProjectDirs::from("com", "apothecary", "back-office")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_public_base_url() -> String {
    "http://localhost:8080/files".to_string()
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        InvoiceSettings {
            storage_root: default_storage_root(),
            public_base_url: default_public_base_url(),
        }
    }
}

// =============================================================================
// Email
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    /// Disabled means send-invoice-email answers 503.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_sender() -> String {
    "invoices@localhost".to_string()
}

impl Default for EmailSettings {
    fn default() -> Self {
        EmailSettings {
            enabled: false,
            sender: default_sender(),
        }
    }
}

// =============================================================================
// Discount Limits
// =============================================================================

/// Ceiling on a single discount for one role.
///
/// A discount is allowed only if it stays within BOTH limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountLimit {
    /// Maximum share of the discounted base, in basis points (10000 = 100%).
    pub max_percent_bps: u32,

    /// Maximum absolute discount in cents.
    pub max_amount_cents: i64,
}

/// Per-role discount limits. Admins are unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountSettings {
    #[serde(default = "default_staff_limit")]
    pub staff: DiscountLimit,

    #[serde(default = "default_manager_limit")]
    pub manager: DiscountLimit,
}

fn default_staff_limit() -> DiscountLimit {
    DiscountLimit {
        max_percent_bps: 1_000,
        max_amount_cents: 5_000,
    }
}

fn default_manager_limit() -> DiscountLimit {
    DiscountLimit {
        max_percent_bps: 5_000,
        max_amount_cents: 50_000,
    }
}

impl Default for DiscountSettings {
    fn default() -> Self {
        DiscountSettings {
            staff: default_staff_limit(),
            manager: default_manager_limit(),
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub invoice: InvoiceSettings,

    #[serde(default)]
    pub email: EmailSettings,

    #[serde(default)]
    pub discounts: DiscountSettings,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
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
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.store.name.trim().is_empty() {
            return Err(EngineError::InvalidConfig("store.name must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        let url = &self.invoice.public_base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(EngineError::InvalidConfig(format!(
                "invoice.public_base_url must start with http:// or https://, got: {}",
                url
            )));
        }

        if self.email.enabled && !self.email.sender.contains('@') {
            return Err(EngineError::InvalidConfig(format!(
                "email.sender is not an address: {}",
                self.email.sender
            )));
        }

        for (role, limit) in [("staff", self.discounts.staff), ("manager", self.discounts.manager)] {
            if limit.max_percent_bps > apothecary_core::money::FULL_BPS {
                return Err(EngineError::InvalidConfig(format!(
                    "discounts.{}.max_percent_bps cannot exceed 10000",
                    role
                )));
            }
            if limit.max_amount_cents < 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "discounts.{}.max_amount_cents cannot be negative",
                    role
                )));
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("APOTHECARY_STORE_NAME") {
            self.store.name = name;
        }

        if let Ok(path) = std::env::var("APOTHECARY_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("APOTHECARY_DB_MAX_CONNECTIONS") {
            if let Ok(m) = max.parse::<u32>() {
                self.database.max_connections = m;
            }
        }

        if let Ok(root) = std::env::var("APOTHECARY_STORAGE_ROOT") {
            debug!(root = %root, "Overriding invoice storage root from environment");
            self.invoice.storage_root = PathBuf::from(root);
        }

        if let Ok(url) = std::env::var("APOTHECARY_PUBLIC_BASE_URL") {
            self.invoice.public_base_url = url;
        }

        if let Ok(enabled) = std::env::var("APOTHECARY_EMAIL_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.email.enabled = true,
                "0" | "false" | "no" => self.email.enabled = false,
                _ => warn!(value = %enabled, "Unknown APOTHECARY_EMAIL_ENABLED value"),
            }
        }

        if let Ok(sender) = std::env::var("APOTHECARY_EMAIL_SENDER") {
            self.email.sender = sender;
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "apothecary", "back-office")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Directory holding rendered invoice files.
    pub fn invoice_dir(&self) -> PathBuf {
        self.invoice.storage_root.join(apothecary_core::INVOICE_DIR)
    }

    pub fn is_email_enabled(&self) -> bool {
        self.email.enabled
    }
}
