//! Configuration for blvm-versionbits
//!
//! Selects the network parameters, the clock rule used for start time and
//! timeout checks, deployment time overrides (the `-vbparams` facility used on
//! test networks), warning thresholds and cache behaviour. Settings can be
//! deserialized from a config file, read from environment variables, or built
//! programmatically.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

use crate::chain::ClockRule;
use crate::constants::{UNEXPECTED_VERSION_THRESHOLD, UNEXPECTED_VERSION_WINDOW};
use crate::deployment::{DeploymentOverride, DeploymentRegistry};
use crate::error::{Result, VersionBitsError};
use crate::types::Network;

/// Unknown-rule and unexpected-version warning settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningConfig {
    /// Evaluate warnings at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of recent blocks checked for unexpected versions
    /// Default: 100
    #[serde(default = "default_window")]
    pub window: u32,

    /// Unexpected versions within the window above which a warning is raised
    /// Default: 50
    #[serde(default = "default_unexpected_threshold")]
    pub unexpected_threshold: u32,
}

fn default_true() -> bool {
    true
}

fn default_window() -> u32 {
    UNEXPECTED_VERSION_WINDOW
}

fn default_unexpected_threshold() -> u32 {
    UNEXPECTED_VERSION_THRESHOLD
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: UNEXPECTED_VERSION_WINDOW,
            unexpected_threshold: UNEXPECTED_VERSION_THRESHOLD,
        }
    }
}

/// State cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Drop cache entries for abandoned branches whenever the tip changes
    ///
    /// Off by default: stale entries are never consulted for other branches,
    /// so keeping them only costs memory.
    #[serde(default)]
    pub evict_on_reorg: bool,
}

/// Complete version bits configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBitsConfig {
    /// Network whose built-in deployments and period/threshold are used
    #[serde(default)]
    pub network: Network,

    /// Clock value compared against start times and timeouts
    /// Default: median time-past
    #[serde(default)]
    pub clock_rule: ClockRule,

    /// Start time / timeout overrides, applied on top of the network defaults
    #[serde(default)]
    pub deployment_overrides: Vec<DeploymentOverride>,

    #[serde(default)]
    pub warnings: WarningConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl VersionBitsConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: `BLVM_VERSIONBITS_<SECTION>_<KEY>`
    ///
    /// - `BLVM_VERSIONBITS_NETWORK=regtest`
    /// - `BLVM_VERSIONBITS_CLOCK_RULE=median_time_past`
    /// - `BLVM_VERSIONBITS_VBPARAMS=csv:0:999999999999,segwit:0:999999999999`
    /// - `BLVM_VERSIONBITS_WARNINGS_ENABLED=false`
    /// - `BLVM_VERSIONBITS_WARNINGS_WINDOW=100`
    /// - `BLVM_VERSIONBITS_WARNINGS_UNEXPECTED_THRESHOLD=50`
    /// - `BLVM_VERSIONBITS_CACHE_EVICT_ON_REORG=true`
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("BLVM_VERSIONBITS_NETWORK") {
            set_parsed("BLVM_VERSIONBITS_NETWORK", &val, &mut config.network);
        }
        if let Some(val) = lookup("BLVM_VERSIONBITS_CLOCK_RULE") {
            set_parsed("BLVM_VERSIONBITS_CLOCK_RULE", &val, &mut config.clock_rule);
        }
        if let Some(val) = lookup("BLVM_VERSIONBITS_VBPARAMS") {
            // Comma-separated name:start:timeout entries
            for entry in val.split(',').filter(|s| !s.trim().is_empty()) {
                match entry.parse::<DeploymentOverride>() {
                    Ok(ov) => config.deployment_overrides.push(ov),
                    Err(e) => warn!(entry, error = %e, "ignoring invalid BLVM_VERSIONBITS_VBPARAMS entry"),
                }
            }
        }

        // Warnings
        if let Some(val) = lookup("BLVM_VERSIONBITS_WARNINGS_ENABLED") {
            set_parsed("BLVM_VERSIONBITS_WARNINGS_ENABLED", &val, &mut config.warnings.enabled);
        }
        if let Some(val) = lookup("BLVM_VERSIONBITS_WARNINGS_WINDOW") {
            set_parsed("BLVM_VERSIONBITS_WARNINGS_WINDOW", &val, &mut config.warnings.window);
        }
        if let Some(val) = lookup("BLVM_VERSIONBITS_WARNINGS_UNEXPECTED_THRESHOLD") {
            set_parsed(
                "BLVM_VERSIONBITS_WARNINGS_UNEXPECTED_THRESHOLD",
                &val,
                &mut config.warnings.unexpected_threshold,
            );
        }

        // Cache
        if let Some(val) = lookup("BLVM_VERSIONBITS_CACHE_EVICT_ON_REORG") {
            set_parsed("BLVM_VERSIONBITS_CACHE_EVICT_ON_REORG", &val, &mut config.cache.evict_on_reorg);
        }

        config
    }

    /// Network registry with this configuration's overrides applied
    pub fn build_registry(&self) -> Result<DeploymentRegistry> {
        let registry = DeploymentRegistry::for_network(self.network);
        if self.deployment_overrides.is_empty() {
            return Ok(registry);
        }
        if self.network == Network::Mainnet {
            return Err(VersionBitsError::Config(
                "deployment overrides are not allowed on mainnet".into(),
            ));
        }
        registry.with_overrides(&self.deployment_overrides)
    }
}

fn set_parsed<T: FromStr>(key: &str, val: &str, target: &mut T) {
    match val.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value = val, "ignoring unparseable configuration value"),
    }
}

/// Global version bits configuration instance
///
/// Initialized once at startup; falls back to the environment otherwise.
static GLOBAL_VERSIONBITS_CONFIG: OnceLock<VersionBitsConfig> = OnceLock::new();

/// Initialize global version bits configuration
///
/// Fails if the configuration was already initialized.
pub fn init_versionbits_config(config: VersionBitsConfig) -> Result<()> {
    GLOBAL_VERSIONBITS_CONFIG
        .set(config)
        .map_err(|_| VersionBitsError::Config("version bits config already initialized".into()))
}

/// Get global version bits configuration
///
/// Returns the global config if initialized, otherwise reads the environment.
pub fn get_versionbits_config() -> VersionBitsConfig {
    GLOBAL_VERSIONBITS_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(VersionBitsConfig::from_env)
}
