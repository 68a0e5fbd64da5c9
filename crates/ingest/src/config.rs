//! Configuration for change extraction.
//!
//! Loaded from TOML, with environment overrides on top:
//!
//! ```toml
//! entry_types = ["account", "contract_data"]
//!
//! [network]
//! passphrase = "Test SDF Network ; September 2015"
//!
//! [range]
//! start = 1000
//! end = 2000
//! batch_size = 64
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! Environment variables use the pattern `HENYEY_INGEST_<SECTION>_<KEY>`.

use std::path::Path;

use henyey_common::network::TESTNET_PASSPHRASE;
use henyey_common::NetworkId;
use serde::{Deserialize, Serialize};
use stellar_xdr::curr::LedgerEntryType;

use crate::backend::LedgerRange;
use crate::batch::BatchOptions;
use crate::{IngestError, Result};

/// Default number of ledgers per batch.
pub const DEFAULT_BATCH_SIZE: u32 = 64;

/// Configuration names of the ledger entry types.
pub const ENTRY_TYPE_NAMES: &[(&str, LedgerEntryType)] = &[
    ("account", LedgerEntryType::Account),
    ("trustline", LedgerEntryType::Trustline),
    ("offer", LedgerEntryType::Offer),
    ("data", LedgerEntryType::Data),
    ("claimable_balance", LedgerEntryType::ClaimableBalance),
    ("liquidity_pool", LedgerEntryType::LiquidityPool),
    ("contract_data", LedgerEntryType::ContractData),
    ("contract_code", LedgerEntryType::ContractCode),
    ("config_setting", LedgerEntryType::ConfigSetting),
    ("ttl", LedgerEntryType::Ttl),
];

/// Parse an entry type name (case-insensitive).
pub fn parse_entry_type(name: &str) -> Result<LedgerEntryType> {
    ENTRY_TYPE_NAMES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name.trim()))
        .map(|(_, entry_type)| *entry_type)
        .ok_or_else(|| IngestError::Config(format!("unknown entry type: {}", name)))
}

pub fn entry_type_name(entry_type: LedgerEntryType) -> &'static str {
    ENTRY_TYPE_NAMES
        .iter()
        .find(|(_, known)| *known == entry_type)
        .map_or("unknown", |(name, _)| name)
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub range: RangeConfig,

    /// Entry types to extract. Empty means all of them.
    #[serde(default)]
    pub entry_types: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network passphrase; transaction hashes depend on it.
    #[serde(default = "default_passphrase")]
    pub passphrase: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            passphrase: default_passphrase(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeConfig {
    /// First ledger to extract.
    #[serde(default = "default_start")]
    pub start: u32,

    /// Last ledger to extract. Without it, extraction stops at the latest
    /// ledger the backend has when streaming starts, or at the end of a meta
    /// stream.
    #[serde(default)]
    pub end: Option<u32>,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: None,
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to use ANSI colors.
    #[serde(default = "default_true")]
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
        }
    }
}

fn default_passphrase() -> String {
    TESTNET_PASSPHRASE.to_string()
}

fn default_start() -> u32 {
    2
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl IngestConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load a file, then apply environment overrides.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Unparsable numbers are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HENYEY_INGEST_NETWORK_PASSPHRASE") {
            self.network.passphrase = val;
        }

        if let Ok(val) = std::env::var("HENYEY_INGEST_RANGE_START") {
            if let Ok(start) = val.parse() {
                self.range.start = start;
            }
        }
        if let Ok(val) = std::env::var("HENYEY_INGEST_RANGE_END") {
            if let Ok(end) = val.parse() {
                self.range.end = Some(end);
            }
        }
        if let Ok(val) = std::env::var("HENYEY_INGEST_RANGE_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                self.range.batch_size = size;
            }
        }

        if let Ok(val) = std::env::var("HENYEY_INGEST_ENTRY_TYPES") {
            self.entry_types = val
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(val) = std::env::var("HENYEY_INGEST_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("HENYEY_INGEST_LOG_FORMAT") {
            self.logging.format = val;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network.passphrase.is_empty() {
            anyhow::bail!("network passphrase must not be empty");
        }
        if self.range.batch_size == 0 {
            anyhow::bail!("batch_size must be > 0");
        }
        if let Some(end) = self.range.end {
            if end < self.range.start {
                anyhow::bail!(
                    "range end ({}) is before range start ({})",
                    end,
                    self.range.start
                );
            }
        }
        self.parsed_entry_types()?;
        crate::logging::parse_format(&self.logging.format)?;
        crate::logging::normalize_level(&self.logging.level)?;
        Ok(())
    }

    pub fn network_id(&self) -> NetworkId {
        NetworkId::from_passphrase(&self.network.passphrase)
    }

    pub fn ledger_range(&self) -> LedgerRange {
        match self.range.end {
            Some(end) => LedgerRange::bounded(self.range.start, end),
            None => LedgerRange::unbounded(self.range.start),
        }
    }

    /// The configured entry types; all of them if none are listed.
    pub fn parsed_entry_types(&self) -> Result<Vec<LedgerEntryType>> {
        if self.entry_types.is_empty() {
            return Ok(ENTRY_TYPE_NAMES.iter().map(|(_, t)| *t).collect());
        }
        let mut types = Vec::with_capacity(self.entry_types.len());
        for name in &self.entry_types {
            let entry_type = parse_entry_type(name)?;
            if !types.contains(&entry_type) {
                types.push(entry_type);
            }
        }
        Ok(types)
    }

    /// Options for the batch driver.
    pub fn batch_options(&self) -> Result<BatchOptions> {
        Ok(BatchOptions::new(self.network_id())
            .with_batch_size(self.range.batch_size)
            .with_entry_types(self.parsed_entry_types()?))
    }
}
