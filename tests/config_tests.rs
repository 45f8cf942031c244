//! Configuration module tests
//!
//! Tests for version bits configuration loading and registry construction.

use blvm_versionbits::chain::ClockRule;
use blvm_versionbits::config::{
    get_versionbits_config, init_versionbits_config, CacheConfig, VersionBitsConfig, WarningConfig,
};
use blvm_versionbits::deployment::DeploymentOverride;
use blvm_versionbits::error::VersionBitsError;
use blvm_versionbits::manager::VersionBitsManager;
use blvm_versionbits::types::Network;

#[test]
fn test_warning_config_default() {
    let config = WarningConfig::default();

    assert!(config.enabled);
    assert_eq!(config.window, 100);
    assert_eq!(config.unexpected_threshold, 50);
}

#[test]
fn test_cache_config_default() {
    let config = CacheConfig::default();

    assert!(!config.evict_on_reorg);
}

#[test]
fn test_versionbits_config_default() {
    let config = VersionBitsConfig::default();

    assert_eq!(config.network, Network::Mainnet);
    assert_eq!(config.clock_rule, ClockRule::MedianTimePast);
    assert!(config.deployment_overrides.is_empty());
}

#[test]
fn test_versionbits_config_from_env() {
    // Test that from_env() doesn't panic
    let _config = VersionBitsConfig::from_env();
}

#[test]
fn test_config_round_trips_through_json() {
    let config = VersionBitsConfig {
        network: Network::Regtest,
        clock_rule: ClockRule::BlockTime,
        deployment_overrides: vec!["segwit:0:5000".parse().unwrap()],
        warnings: WarningConfig {
            enabled: false,
            window: 20,
            unexpected_threshold: 10,
        },
        cache: CacheConfig { evict_on_reorg: true },
    };
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"clock_rule\":\"block_time\""));
    assert!(json.contains("\"network\":\"regtest\""));
    let parsed: VersionBitsConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_empty_document_uses_defaults() {
    let parsed: VersionBitsConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(parsed, VersionBitsConfig::default());
}

#[test]
fn test_manager_from_config_applies_overrides() {
    let config = VersionBitsConfig {
        network: Network::Testnet,
        deployment_overrides: vec![DeploymentOverride {
            name: "testdummy".into(),
            start_time: 10,
            timeout: 20,
        }],
        ..VersionBitsConfig::default()
    };
    let manager = VersionBitsManager::from_config(config).unwrap();
    let testdummy = manager.registry().get("testdummy").unwrap();
    assert_eq!((testdummy.start_time, testdummy.timeout), (10, 20));
    assert_eq!(testdummy.period, 2016);
    assert_eq!(testdummy.threshold, 1512);
}

#[test]
fn test_manager_from_config_rejects_unknown_override() {
    let config = VersionBitsConfig {
        network: Network::Regtest,
        deployment_overrides: vec!["taproot:0:1".parse().unwrap()],
        ..VersionBitsConfig::default()
    };
    assert_eq!(
        VersionBitsManager::from_config(config).unwrap_err(),
        VersionBitsError::UnknownDeployment("taproot".into())
    );
}

#[test]
fn test_global_config_initializes_once() {
    let config = VersionBitsConfig {
        network: Network::Regtest,
        ..VersionBitsConfig::default()
    };
    init_versionbits_config(config.clone()).unwrap();
    assert_eq!(get_versionbits_config(), config);
    assert!(matches!(
        init_versionbits_config(VersionBitsConfig::default()),
        Err(VersionBitsError::Config(_))
    ));
    assert_eq!(get_versionbits_config().network, Network::Regtest);
}
