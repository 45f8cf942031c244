//! Version bits manager
//!
//! [`VersionBitsManager`] owns the deployment registry and the state caches
//! and is the entry point used by block validation, block template assembly
//! and status reporting. Queries borrow a chain view for their duration via
//! [`VersionBitsContext`]; the manager itself never holds on to chain data.

use std::collections::BTreeMap;
use tracing::debug;

use crate::activation::{self, DeploymentStatus};
use crate::cache::{CachedState, StateCache, VersionBitsCache};
use crate::chain::{AncestorView, ClockRule, NodeId};
use crate::config::VersionBitsConfig;
use crate::deployment::{Deployment, DeploymentRegistry};
use crate::error::Result;
use crate::statistics::{get_state_statistics, PeriodStatistics};
use crate::threshold::{get_state_and_since, ThresholdState};
use crate::types::{Height, Network};
use crate::version::{self, BlockTemplateRules};
use crate::warnings::{self, VersionBitsWarnings};

/// Everything a version bits query needs, borrowed for one call
pub struct VersionBitsContext<'a, V: AncestorView + ?Sized> {
    pub registry: &'a DeploymentRegistry,
    pub cache: &'a VersionBitsCache,
    pub view: &'a V,
    pub clock: ClockRule,
}

impl<V: AncestorView + ?Sized> Clone for VersionBitsContext<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: AncestorView + ?Sized> Copy for VersionBitsContext<'_, V> {}

impl<'a, V: AncestorView + ?Sized> VersionBitsContext<'a, V> {
    pub fn new(
        registry: &'a DeploymentRegistry,
        cache: &'a VersionBitsCache,
        view: &'a V,
        clock: ClockRule,
    ) -> Self {
        Self {
            registry,
            cache,
            view,
            clock,
        }
    }

    /// Deployment named `name` together with its state cache
    pub fn deployment(&self, name: &str) -> Result<(&'a Deployment, &'a StateCache)> {
        let pos = self.registry.position(name)?;
        let deployment = self.registry.get(name)?;
        Ok((deployment, self.cache.deployment(pos)?))
    }

    /// Deployments in registry order, each with its state cache
    pub fn deployments(&self) -> impl Iterator<Item = Result<(&'a Deployment, &'a StateCache)>> + 'a {
        let cache = self.cache;
        self.registry
            .iter()
            .enumerate()
            .map(move |(pos, d)| Ok((d, cache.deployment(pos)?)))
    }

    /// State and since-height of `name` for the block following `prev`
    pub fn state_and_since(&self, name: &str, prev: Option<NodeId>) -> Result<CachedState> {
        let (deployment, cache) = self.deployment(name)?;
        get_state_and_since(deployment, self.view, cache, self.clock, prev)
    }

    pub fn state(&self, name: &str, prev: Option<NodeId>) -> Result<ThresholdState> {
        self.state_and_since(name, prev).map(|s| s.state)
    }

    pub fn state_since_height(&self, name: &str, prev: Option<NodeId>) -> Result<Height> {
        self.state_and_since(name, prev).map(|s| s.since)
    }

    pub fn statistics(&self, name: &str, tip: Option<NodeId>) -> Result<PeriodStatistics> {
        let (deployment, _) = self.deployment(name)?;
        get_state_statistics(deployment, self.view, tip)
    }
}

/// Registry, caches and configuration of one node
#[derive(Debug)]
pub struct VersionBitsManager {
    config: VersionBitsConfig,
    registry: DeploymentRegistry,
    cache: VersionBitsCache,
}

impl VersionBitsManager {
    /// Build from configuration, applying any deployment overrides
    pub fn from_config(config: VersionBitsConfig) -> Result<Self> {
        let registry = config.build_registry()?;
        debug!(
            network = config.network.as_str(),
            deployments = registry.len(),
            clock_rule = ?config.clock_rule,
            "version bits manager initialized"
        );
        Ok(Self::with_registry(config, registry))
    }

    /// Built-in deployments and default settings for `network`
    pub fn for_network(network: Network) -> Self {
        let config = VersionBitsConfig {
            network,
            ..VersionBitsConfig::default()
        };
        Self::with_registry(config, DeploymentRegistry::for_network(network))
    }

    /// Use an explicit registry; `config.deployment_overrides` is not applied
    pub fn with_registry(config: VersionBitsConfig, registry: DeploymentRegistry) -> Self {
        let cache = VersionBitsCache::new(registry.len());
        Self {
            config,
            registry,
            cache,
        }
    }

    pub fn config(&self) -> &VersionBitsConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeploymentRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &VersionBitsCache {
        &self.cache
    }

    pub fn ctx<'a, V: AncestorView + ?Sized>(&'a self, view: &'a V) -> VersionBitsContext<'a, V> {
        VersionBitsContext::new(&self.registry, &self.cache, view, self.config.clock_rule)
    }

    pub fn state<V: AncestorView + ?Sized>(&self, view: &V, name: &str, prev: Option<NodeId>) -> Result<ThresholdState> {
        self.ctx(view).state(name, prev)
    }

    pub fn state_since_height<V: AncestorView + ?Sized>(
        &self,
        view: &V,
        name: &str,
        prev: Option<NodeId>,
    ) -> Result<Height> {
        self.ctx(view).state_since_height(name, prev)
    }

    pub fn statistics<V: AncestorView + ?Sized>(
        &self,
        view: &V,
        name: &str,
        tip: Option<NodeId>,
    ) -> Result<PeriodStatistics> {
        self.ctx(view).statistics(name, tip)
    }

    pub fn is_active<V: AncestorView + ?Sized>(&self, view: &V, name: &str, prev: Option<NodeId>) -> Result<bool> {
        activation::is_active(&self.ctx(view), name, prev)
    }

    pub fn deployment_status<V: AncestorView + ?Sized>(
        &self,
        view: &V,
        name: &str,
        tip: Option<NodeId>,
    ) -> Result<DeploymentStatus> {
        activation::deployment_state(&self.ctx(view), name, tip)
    }

    pub fn softforks_report<V: AncestorView + ?Sized>(
        &self,
        view: &V,
        tip: Option<NodeId>,
    ) -> Result<BTreeMap<String, DeploymentStatus>> {
        activation::softforks_report(&self.ctx(view), tip)
    }

    pub fn compute_block_version<V: AncestorView + ?Sized>(&self, view: &V, prev: Option<NodeId>) -> Result<u32> {
        version::compute_block_version(&self.ctx(view), prev)
    }

    pub fn block_template_rules<V: AncestorView + ?Sized>(
        &self,
        view: &V,
        tip: Option<NodeId>,
        client_rules: &[&str],
    ) -> Result<BlockTemplateRules> {
        version::block_template_rules(&self.ctx(view), tip, client_rules)
    }

    /// Unknown-rule and unexpected-version warnings at `tip`
    ///
    /// Returns an empty report when warnings are disabled.
    pub fn check_warnings<V: AncestorView + ?Sized>(&self, view: &V, tip: Option<NodeId>) -> Result<VersionBitsWarnings> {
        if !self.config.warnings.enabled {
            return Ok(VersionBitsWarnings::default());
        }
        warnings::check_warnings(&self.ctx(view), tip, &self.config.warnings)
    }

    /// Called after chain management switches tips
    ///
    /// Evicts cache entries off the ancestry of `live_tips` when
    /// `cache.evict_on_reorg` is set. Results are unaffected either way.
    pub fn notify_reorg<V: AncestorView + ?Sized>(&self, view: &V, live_tips: &[NodeId]) -> Result<usize> {
        if !self.config.cache.evict_on_reorg {
            return Ok(0);
        }
        self.cache.evict_unreachable(view, live_tips)
    }
}
