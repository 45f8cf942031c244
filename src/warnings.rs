//! Unknown version bits warnings
//!
//! Miners signalling bits this node knows nothing about usually means a soft
//! fork this software does not implement is being deployed. Every bit not
//! claimed by a registered deployment is tracked through the threshold engine
//! like a deployment with no time limits. Once such a bit locks in, the node
//! keeps validating blocks but can no longer be sure it enforces every rule.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chain::{AncestorView, ChainNode, NodeId};
use crate::config::WarningConfig;
use crate::constants::{VERSIONBITS_LAST_OLD_BLOCK_VERSION, VERSIONBITS_NUM_BITS};
use crate::error::Result;
use crate::manager::VersionBitsContext;
use crate::statistics::is_signalling;
use crate::threshold::{get_state_for, ThresholdCondition, ThresholdState};
use crate::types::VersionBitsParams;
use crate::version::compute_block_version;

/// Threshold condition for a bit no registered deployment uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownBitCondition {
    pub bit: u8,
    pub params: VersionBitsParams,
}

impl ThresholdCondition for UnknownBitCondition {
    fn begin_time(&self) -> u64 {
        0
    }

    fn end_time(&self) -> u64 {
        u64::MAX
    }

    fn period(&self) -> u32 {
        self.params.period
    }

    fn threshold(&self) -> u32 {
        self.params.threshold
    }

    fn condition(&self, node: &ChainNode) -> bool {
        is_signalling(node.version, self.bit)
    }
}

/// An unknown bit that reached lock-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownRuleWarning {
    pub bit: u8,
    pub state: ThresholdState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBitsWarnings {
    pub unknown_rules: Vec<UnknownRuleWarning>,
    /// Blocks within the window carrying bits the node would not have set
    pub unexpected_versions: u32,
    pub unexpected_version_warning: bool,
}

impl VersionBitsWarnings {
    pub fn is_empty(&self) -> bool {
        self.unknown_rules.is_empty() && !self.unexpected_version_warning
    }
}

/// Unknown bits locked in or active for the block following `tip`
pub fn unknown_rules<V>(ctx: &VersionBitsContext<'_, V>, tip: Option<NodeId>) -> Result<Vec<UnknownRuleWarning>>
where
    V: AncestorView + ?Sized,
{
    let known = ctx.registry.known_mask();
    let params = ctx.registry.params();
    let mut found = Vec::new();
    for bit in 0..VERSIONBITS_NUM_BITS {
        if known & (1 << bit) != 0 {
            continue;
        }
        let condition = UnknownBitCondition { bit, params };
        let state = get_state_for(&condition, ctx.view, ctx.cache.warning(bit)?, ctx.clock, tip)?;
        if matches!(state, ThresholdState::LockedIn | ThresholdState::Active) {
            found.push(UnknownRuleWarning { bit, state });
        }
    }
    Ok(found)
}

/// Blocks among the last `window` ending at `tip` whose version sets bits
/// the node would not have set itself
pub fn unexpected_version_count<V>(ctx: &VersionBitsContext<'_, V>, tip: Option<NodeId>, window: u32) -> Result<u32>
where
    V: AncestorView + ?Sized,
{
    let mut count = 0;
    let mut cursor = tip;
    for _ in 0..window {
        let Some(id) = cursor else { break };
        let node = ctx.view.get(id)?;
        let expected = compute_block_version(ctx, node.parent)?;
        if node.version > VERSIONBITS_LAST_OLD_BLOCK_VERSION && node.version & !expected != 0 {
            count += 1;
        }
        cursor = node.parent;
    }
    Ok(count)
}

/// Evaluate both warnings at `tip`, logging any that fire
pub fn check_warnings<V>(
    ctx: &VersionBitsContext<'_, V>,
    tip: Option<NodeId>,
    config: &WarningConfig,
) -> Result<VersionBitsWarnings>
where
    V: AncestorView + ?Sized,
{
    let unknown_rules = unknown_rules(ctx, tip)?;
    for rule in &unknown_rules {
        warn!(
            bit = rule.bit,
            state = %rule.state,
            "unknown new rules activated (versionbit {})",
            rule.bit
        );
    }

    let unexpected_versions = unexpected_version_count(ctx, tip, config.window)?;
    let unexpected_version_warning = unexpected_versions > config.unexpected_threshold;
    if unexpected_version_warning {
        warn!(
            unexpected_versions,
            window = config.window,
            "{} of last {} blocks have unexpected version",
            unexpected_versions,
            config.window
        );
    }

    Ok(VersionBitsWarnings {
        unknown_rules,
        unexpected_versions,
        unexpected_version_warning,
    })
}
