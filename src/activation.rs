//! Activation Query Interface
//!
//! Answers "is rule X in force for the block after this one" for validation
//! code, and builds the per-deployment status report shown by node status
//! commands.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::StateCache;
use crate::chain::{AncestorView, NodeId};
use crate::deployment::Deployment;
use crate::error::Result;
use crate::manager::VersionBitsContext;
use crate::statistics::{get_state_statistics, PeriodStatistics};
use crate::threshold::{get_state_and_since, ThresholdState};
use crate::types::Height;

/// Whether `name` is enforced for the block following `prev`
pub fn is_active<V>(ctx: &VersionBitsContext<'_, V>, name: &str, prev: Option<NodeId>) -> Result<bool>
where
    V: AncestorView + ?Sized,
{
    Ok(ctx.state(name, prev)? == ThresholdState::Active)
}

/// Status of one deployment as reported to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub status: ThresholdState,
    pub bit: u8,
    pub start_time: u64,
    pub timeout: u64,
    /// Height of the first block to which `status` applies
    pub since: Height,
    /// Signalling progress, only while the deployment is started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<PeriodStatistics>,
}

fn status_of<V>(
    ctx: &VersionBitsContext<'_, V>,
    deployment: &Deployment,
    cache: &StateCache,
    tip: Option<NodeId>,
) -> Result<DeploymentStatus>
where
    V: AncestorView + ?Sized,
{
    let state = get_state_and_since(deployment, ctx.view, cache, ctx.clock, tip)?;
    let statistics = if state.state == ThresholdState::Started {
        Some(get_state_statistics(deployment, ctx.view, tip)?)
    } else {
        None
    };
    Ok(DeploymentStatus {
        status: state.state,
        bit: deployment.bit,
        start_time: deployment.start_time,
        timeout: deployment.timeout,
        since: state.since,
        statistics,
    })
}

/// Status of `name` for the block following `tip`
pub fn deployment_state<V>(
    ctx: &VersionBitsContext<'_, V>,
    name: &str,
    tip: Option<NodeId>,
) -> Result<DeploymentStatus>
where
    V: AncestorView + ?Sized,
{
    let (deployment, cache) = ctx.deployment(name)?;
    status_of(ctx, deployment, cache, tip)
}

/// Status of every registered deployment, keyed by name
pub fn softforks_report<V>(
    ctx: &VersionBitsContext<'_, V>,
    tip: Option<NodeId>,
) -> Result<BTreeMap<String, DeploymentStatus>>
where
    V: AncestorView + ?Sized,
{
    ctx.deployments()
        .map(|entry| {
            let (deployment, cache) = entry?;
            Ok((deployment.name.clone(), status_of(ctx, deployment, cache, tip)?))
        })
        .collect()
}
