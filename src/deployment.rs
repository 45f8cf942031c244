//! Deployment Registry
//!
//! Static description of every candidate rule change tracked through version
//! bits: name, signalling bit, start time, timeout, period and threshold.
//! The registry is validated once at construction; a bit collision between
//! deployments with overlapping time ranges is a configuration error that
//! aborts initialization rather than something discovered at query time.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chain::ChainNode;
use crate::constants::{NO_TIMEOUT, VERSIONBITS_NUM_BITS};
use crate::error::{Result, VersionBitsError};
use crate::statistics::is_signalling;
use crate::threshold::ThresholdCondition;
use crate::types::{Height, Network, VersionBitsParams};

/// One BIP9 deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique identifier, also the rule name reported to template clients
    pub name: String,
    /// Bit position (0-28) in the version field
    pub bit: u8,
    /// Clock value at which signalling starts
    pub start_time: u64,
    /// Clock value after which an unlocked deployment fails
    pub timeout: u64,
    /// Blocks per signalling period
    pub period: u32,
    /// Signalling blocks within one period needed to lock in
    pub threshold: u32,
    /// Earliest height at which a locked-in deployment may become active
    #[serde(default)]
    pub min_activation_height: Height,
    /// Whether template clients that don't understand the rule may ignore it
    #[serde(default = "default_gbt_force")]
    pub gbt_force: bool,
}

fn default_gbt_force() -> bool {
    true
}

impl Deployment {
    /// Deployment using the network-wide period and threshold
    pub fn new(name: impl Into<String>, bit: u8, start_time: u64, timeout: u64, params: VersionBitsParams) -> Self {
        Self {
            name: name.into(),
            bit,
            start_time,
            timeout,
            period: params.period,
            threshold: params.threshold,
            min_activation_height: 0,
            gbt_force: true,
        }
    }

    pub fn with_min_activation_height(mut self, height: Height) -> Self {
        self.min_activation_height = height;
        self
    }

    pub fn with_gbt_force(mut self, gbt_force: bool) -> Self {
        self.gbt_force = gbt_force;
        self
    }

    /// Version field mask for this deployment's bit
    #[inline]
    pub fn mask(&self) -> u32 {
        1u32 << self.bit
    }

    /// Whether `[start_time, timeout)` intersects the other deployment's range
    pub fn overlaps(&self, other: &Deployment) -> bool {
        self.start_time < other.timeout && other.start_time < self.timeout
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &'static str| VersionBitsError::InvalidDeployment {
            name: self.name.clone(),
            reason: reason.into(),
        };
        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.bit >= VERSIONBITS_NUM_BITS {
            return Err(invalid("bit must be in 0..=28"));
        }
        if self.period == 0 {
            return Err(invalid("period must be positive"));
        }
        if self.threshold == 0 || self.threshold > self.period {
            return Err(invalid("threshold must be in 1..=period"));
        }
        if self.timeout <= self.start_time {
            return Err(invalid("timeout must be after start time"));
        }
        Ok(())
    }
}

impl ThresholdCondition for Deployment {
    fn begin_time(&self) -> u64 {
        self.start_time
    }

    fn end_time(&self) -> u64 {
        self.timeout
    }

    fn period(&self) -> u32 {
        self.period
    }

    fn threshold(&self) -> u32 {
        self.threshold
    }

    fn min_activation_height(&self) -> Height {
        self.min_activation_height
    }

    fn condition(&self, node: &ChainNode) -> bool {
        is_signalling(node.version, self.bit)
    }
}

/// Start time / timeout override for a named deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOverride {
    pub name: String,
    pub start_time: u64,
    pub timeout: u64,
}

impl std::str::FromStr for DeploymentOverride {
    type Err = VersionBitsError;

    /// Parse `name:start_time:timeout`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(VersionBitsError::Config(
                format!("version bits override '{s}' must be name:start:end").into(),
            ));
        }
        let parse = |value: &str| {
            value.trim().parse::<u64>().map_err(|_| {
                VersionBitsError::Config(format!("invalid time '{value}' in override '{s}'").into())
            })
        };
        Ok(Self {
            name: parts[0].trim().to_string(),
            start_time: parse(parts[1])?,
            timeout: parse(parts[2])?,
        })
    }
}

/// Validated, immutable set of deployments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRegistry {
    params: VersionBitsParams,
    deployments: Vec<Deployment>,
}

impl DeploymentRegistry {
    /// Validate and build a registry
    pub fn new(params: VersionBitsParams, deployments: Vec<Deployment>) -> Result<Self> {
        if params.period == 0 || params.threshold == 0 || params.threshold > params.period {
            return Err(VersionBitsError::Config(
                "network threshold must be in 1..=period".into(),
            ));
        }
        for (i, deployment) in deployments.iter().enumerate() {
            deployment.validate()?;
            for earlier in &deployments[..i] {
                if earlier.name == deployment.name {
                    return Err(VersionBitsError::DuplicateDeployment(deployment.name.clone()));
                }
                if earlier.bit == deployment.bit && earlier.overlaps(deployment) {
                    warn!(
                        first = %earlier.name,
                        second = %deployment.name,
                        bit = deployment.bit,
                        "rejecting deployments with colliding signal bits"
                    );
                    return Err(VersionBitsError::BitCollision {
                        first: earlier.name.clone(),
                        second: deployment.name.clone(),
                        bit: deployment.bit,
                    });
                }
            }
        }
        Ok(Self {
            params,
            deployments,
        })
    }

    /// Built-in deployments for `network`
    ///
    /// - `testdummy`: bit 28, used to exercise the machinery
    /// - `csv`: bit 0, BIP68/BIP112/BIP113
    /// - `segwit`: bit 1, BIP141/BIP143/BIP147
    pub fn for_network(network: Network) -> Self {
        let params = network.versionbits_params();
        let testdummy = match network {
            // January 1, 2008 - December 31, 2008
            Network::Mainnet | Network::Testnet => {
                Deployment::new("testdummy", 28, 1_199_145_601, 1_230_767_999, params)
            }
            Network::Regtest => Deployment::new("testdummy", 28, 0, NO_TIMEOUT, params),
        };
        Self {
            params,
            deployments: vec![
                testdummy,
                Deployment::new("csv", 0, 0, NO_TIMEOUT, params),
                Deployment::new("segwit", 1, 0, NO_TIMEOUT, params).with_gbt_force(false),
            ],
        }
    }

    /// Apply start/timeout overrides and re-validate
    pub fn with_overrides(self, overrides: &[DeploymentOverride]) -> Result<Self> {
        let mut deployments = self.deployments;
        for ov in overrides {
            let deployment = deployments
                .iter_mut()
                .find(|d| d.name == ov.name)
                .ok_or_else(|| VersionBitsError::UnknownDeployment(ov.name.clone()))?;
            deployment.start_time = ov.start_time;
            deployment.timeout = ov.timeout;
        }
        Self::new(self.params, deployments)
    }

    pub fn params(&self) -> VersionBitsParams {
        self.params
    }

    pub fn get(&self, name: &str) -> Result<&Deployment> {
        self.deployments
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| VersionBitsError::UnknownDeployment(name.to_string()))
    }

    /// Position of `name`, used to select its state cache
    pub fn position(&self, name: &str) -> Result<usize> {
        self.deployments
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| VersionBitsError::UnknownDeployment(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Deployment> {
        self.deployments.iter()
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    /// OR of every registered deployment's bit
    pub fn known_mask(&self) -> u32 {
        self.deployments.iter().fold(0, |mask, d| mask | d.mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> VersionBitsParams {
        Network::Regtest.versionbits_params()
    }

    #[test]
    fn test_builtin_registry_is_valid() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            let registry = DeploymentRegistry::for_network(network);
            let rebuilt =
                DeploymentRegistry::new(registry.params(), registry.iter().cloned().collect());
            assert_eq!(rebuilt.unwrap(), registry);
        }
    }

    #[test]
    fn test_regtest_params() {
        let registry = DeploymentRegistry::for_network(Network::Regtest);
        let csv = registry.get("csv").unwrap();
        assert_eq!(csv.bit, 0);
        assert_eq!(csv.period, 844);
        assert_eq!(csv.threshold, 633);
        assert!(!registry.get("segwit").unwrap().gbt_force);
    }

    #[test]
    fn test_unknown_deployment() {
        let registry = DeploymentRegistry::for_network(Network::Mainnet);
        assert_eq!(
            registry.get("taproot").unwrap_err(),
            VersionBitsError::UnknownDeployment("taproot".to_string())
        );
    }

    #[test]
    fn test_bit_collision_with_overlapping_ranges_rejected() {
        let result = DeploymentRegistry::new(
            params(),
            vec![
                Deployment::new("a", 3, 100, 200, params()),
                Deployment::new("b", 3, 150, 300, params()),
            ],
        );
        assert!(matches!(result, Err(VersionBitsError::BitCollision { bit: 3, .. })));
    }

    #[test]
    fn test_bit_reuse_with_disjoint_ranges_allowed() {
        let result = DeploymentRegistry::new(
            params(),
            vec![
                Deployment::new("a", 3, 100, 200, params()),
                Deployment::new("b", 3, 200, 300, params()),
            ],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = DeploymentRegistry::new(
            params(),
            vec![
                Deployment::new("a", 3, 100, 200, params()),
                Deployment::new("a", 4, 100, 200, params()),
            ],
        );
        assert_eq!(result.unwrap_err(), VersionBitsError::DuplicateDeployment("a".into()));
    }

    #[test]
    fn test_invalid_deployments_rejected() {
        let bad_bit = Deployment::new("x", 29, 0, 10, params());
        let bad_threshold = Deployment {
            threshold: 845,
            ..Deployment::new("y", 1, 0, 10, params())
        };
        let bad_range = Deployment::new("z", 2, 10, 10, params());
        for deployment in [bad_bit, bad_threshold, bad_range] {
            assert!(matches!(
                DeploymentRegistry::new(params(), vec![deployment]),
                Err(VersionBitsError::InvalidDeployment { .. })
            ));
        }
    }

    #[test]
    fn test_overrides_applied_and_revalidated() {
        let registry = DeploymentRegistry::for_network(Network::Regtest)
            .with_overrides(&[DeploymentOverride {
                name: "csv".into(),
                start_time: 1000,
                timeout: 2000,
            }])
            .unwrap();
        let csv = registry.get("csv").unwrap();
        assert_eq!((csv.start_time, csv.timeout), (1000, 2000));

        let rejected = DeploymentRegistry::for_network(Network::Regtest).with_overrides(&[
            DeploymentOverride {
                name: "csv".into(),
                start_time: 2000,
                timeout: 1000,
            },
        ]);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_override_parsing() {
        let ov: DeploymentOverride = "csv:0:999".parse().unwrap();
        assert_eq!(ov.name, "csv");
        assert_eq!((ov.start_time, ov.timeout), (0, 999));
        assert!("csv:0".parse::<DeploymentOverride>().is_err());
        assert!("csv:a:1".parse::<DeploymentOverride>().is_err());
    }

    #[test]
    fn test_known_mask() {
        let registry = DeploymentRegistry::for_network(Network::Regtest);
        assert_eq!(registry.known_mask(), (1 << 28) | 0b11);
    }
}
