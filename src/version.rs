//! Version Composer
//!
//! Block version for new blocks and the version bits section of block
//! templates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chain::{AncestorView, NodeId};
use crate::constants::VERSIONBITS_TOP_BITS;
use crate::deployment::Deployment;
use crate::error::{Result, VersionBitsError};
use crate::manager::VersionBitsContext;
use crate::threshold::{get_state_for, ThresholdState};

/// Version for a block built on `prev`
///
/// Sets the bit of every deployment that is `Started` or `LockedIn` for that
/// block, on top of the `001` prefix.
pub fn compute_block_version<V>(ctx: &VersionBitsContext<'_, V>, prev: Option<NodeId>) -> Result<u32>
where
    V: AncestorView + ?Sized,
{
    let mut version = VERSIONBITS_TOP_BITS;
    for entry in ctx.deployments() {
        let (deployment, cache) = entry?;
        let state = get_state_for(deployment, ctx.view, cache, ctx.clock, prev)?;
        if state.is_signalling_phase() {
            version |= deployment.mask();
        }
    }
    Ok(version)
}

/// Rule name as reported to template clients
///
/// Rules that clients may not ignore carry a `!` prefix.
pub fn gbt_name(deployment: &Deployment) -> String {
    if deployment.gbt_force {
        deployment.name.clone()
    } else {
        format!("!{}", deployment.name)
    }
}

/// Version bits fields of a block template
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockTemplateRules {
    pub version: u32,
    /// Active rules the block must follow
    pub rules: Vec<String>,
    /// Pending deployments and their bits
    pub vbavailable: BTreeMap<String, u8>,
    /// Bits the server requires clients to set
    pub vbrequired: u32,
}

/// Template rules for a block built on `tip`
///
/// `client_rules` are the rule names the template client understands. A
/// client that does not support an active rule marked non-forceable cannot
/// build valid blocks and is refused with [`VersionBitsError::UnsupportedRule`].
pub fn block_template_rules<V>(
    ctx: &VersionBitsContext<'_, V>,
    tip: Option<NodeId>,
    client_rules: &[&str],
) -> Result<BlockTemplateRules>
where
    V: AncestorView + ?Sized,
{
    let supports = |d: &Deployment| client_rules.contains(&d.name.as_str());
    let mut template = BlockTemplateRules {
        version: compute_block_version(ctx, tip)?,
        ..BlockTemplateRules::default()
    };

    for entry in ctx.deployments() {
        let (deployment, cache) = entry?;
        match get_state_for(deployment, ctx.view, cache, ctx.clock, tip)? {
            ThresholdState::Defined | ThresholdState::Failed => {}
            ThresholdState::Started => {
                template
                    .vbavailable
                    .insert(gbt_name(deployment), deployment.bit);
                if !supports(deployment) && !deployment.gbt_force {
                    template.version &= !deployment.mask();
                }
            }
            ThresholdState::LockedIn => {
                template
                    .vbavailable
                    .insert(gbt_name(deployment), deployment.bit);
            }
            ThresholdState::Active => {
                template.rules.push(gbt_name(deployment));
                if !supports(deployment) && !deployment.gbt_force {
                    return Err(VersionBitsError::UnsupportedRule(deployment.name.clone()));
                }
            }
        }
    }
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::*;
    use crate::chain::ChainIndex;
    use crate::manager::VersionBitsManager;
    use crate::types::Network;

    #[test]
    fn test_version_at_genesis_has_no_bits() {
        let manager = VersionBitsManager::for_network(Network::Regtest);
        let index = ChainIndex::new();
        assert_eq!(manager.compute_block_version(&index, None).unwrap(), 0x2000_0000);
    }

    #[test]
    fn test_started_deployments_set_bits() {
        let manager = VersionBitsManager::for_network(Network::Regtest);
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let tip = mine(&mut index, g, 843, 4);
        assert_eq!(
            manager.compute_block_version(&index, Some(tip)).unwrap(),
            0x2000_0000 | (1 << 28) | 0b11
        );
    }

    #[test]
    fn test_template_clears_unsupported_non_forceable_bit() {
        let manager = VersionBitsManager::for_network(Network::Regtest);
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let tip = mine(&mut index, g, 843, 4);

        let template = manager.block_template_rules(&index, Some(tip), &[]).unwrap();
        // segwit is non-forceable and dropped, csv and testdummy are kept
        assert_eq!(template.version, 0x2000_0000 | (1 << 28) | 0b01);
        assert_eq!(template.vbavailable.get("!segwit"), Some(&1));
        assert_eq!(template.vbavailable.get("csv"), Some(&0));
        assert!(template.rules.is_empty());
        assert_eq!(template.vbrequired, 0);

        let template = manager
            .block_template_rules(&index, Some(tip), &["segwit"])
            .unwrap();
        assert_eq!(template.version, 0x2000_0000 | (1 << 28) | 0b11);
    }

    #[test]
    fn test_active_non_forceable_rule_requires_client_support() {
        let manager = VersionBitsManager::for_network(Network::Regtest);
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let tip = mine(&mut index, g, 843, 4);
        let tip = mine(&mut index, tip, 844, 0x2000_0003);
        let tip = mine(&mut index, tip, 844, 4);
        assert_eq!(manager.state(&index, "segwit", Some(tip)).unwrap(), ThresholdState::Active);

        assert_eq!(
            manager.block_template_rules(&index, Some(tip), &[]),
            Err(VersionBitsError::UnsupportedRule("segwit".into()))
        );
        let template = manager
            .block_template_rules(&index, Some(tip), &["segwit"])
            .unwrap();
        assert_eq!(template.rules, vec!["csv".to_string(), "!segwit".to_string()]);
        // testdummy never signalled and is still started
        assert_eq!(template.version, 0x2000_0000 | (1 << 28));
        assert_eq!(template.vbavailable.len(), 1);
    }

    #[test]
    fn test_gbt_name() {
        let registry = crate::deployment::DeploymentRegistry::for_network(Network::Mainnet);
        assert_eq!(gbt_name(registry.get("csv").unwrap()), "csv");
        assert_eq!(gbt_name(registry.get("segwit").unwrap()), "!segwit");
    }
}
