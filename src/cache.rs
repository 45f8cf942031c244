//! State caches for the threshold engine
//!
//! One [`StateCache`] per tracked condition, keyed by the [`NodeId`] of a
//! period boundary. Keys are node identities, never heights, so two forks at
//! the same height can never share an entry. Entries for abandoned branches
//! are unreachable but harmless; [`VersionBitsCache::evict_unreachable`]
//! drops them opportunistically.
//!
//! Lookups take the shared lock, insertions the exclusive lock. An entry is
//! a single `Copy` value written under the lock, so readers never observe a
//! partially written entry.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::chain::{AncestorView, NodeId};
use crate::constants::VERSIONBITS_NUM_BITS;
use crate::error::{Result, VersionBitsError};
use crate::threshold::ThresholdState;
use crate::types::Height;

/// Memoized state at a period boundary, with the height it started applying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedState {
    pub state: ThresholdState,
    pub since: Height,
}

impl CachedState {
    /// `Defined` since genesis
    pub const INITIAL: CachedState = CachedState {
        state: ThresholdState::Defined,
        since: 0,
    };
}

#[derive(Debug, Default)]
pub struct StateCache {
    entries: RwLock<HashMap<NodeId, CachedState>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, boundary: NodeId) -> Option<CachedState> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&boundary)
            .copied()
    }

    pub fn insert(&self, boundary: NodeId, state: CachedState) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(boundary, state);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Keep only entries whose boundary satisfies `keep`; returns how many were dropped
    pub fn retain(&self, mut keep: impl FnMut(NodeId) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|id, _| keep(*id));
        before - entries.len()
    }
}

/// Caches for every registered deployment plus one per version bit for
/// unknown-rule warnings
#[derive(Debug)]
pub struct VersionBitsCache {
    deployments: Vec<StateCache>,
    warnings: Vec<StateCache>,
}

impl VersionBitsCache {
    pub fn new(deployment_count: usize) -> Self {
        Self {
            deployments: (0..deployment_count).map(|_| StateCache::new()).collect(),
            warnings: (0..VERSIONBITS_NUM_BITS).map(|_| StateCache::new()).collect(),
        }
    }

    /// Cache of the deployment at registry position `pos`
    pub fn deployment(&self, pos: usize) -> Result<&StateCache> {
        self.deployments
            .get(pos)
            .ok_or_else(|| VersionBitsError::UnknownDeployment(format!("position {pos}")))
    }

    /// Cache of the unknown-rule tracker for `bit`
    pub fn warning(&self, bit: u8) -> Result<&StateCache> {
        self.warnings
            .get(usize::from(bit))
            .ok_or_else(|| VersionBitsError::Config(format!("no version bit {bit}").into()))
    }

    fn all(&self) -> impl Iterator<Item = &StateCache> {
        self.deployments.iter().chain(self.warnings.iter())
    }

    /// Total number of cached boundaries across all slots
    pub fn len(&self) -> usize {
        self.all().map(StateCache::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for cache in self.all() {
            cache.clear();
        }
    }

    /// Drop entries for boundaries not on the ancestry of any live tip
    ///
    /// Never changes query results: a dropped entry is recomputed on demand.
    pub fn evict_unreachable<V>(&self, view: &V, live_tips: &[NodeId]) -> Result<usize>
    where
        V: AncestorView + ?Sized,
    {
        let mut reachable = HashSet::new();
        for &tip in live_tips {
            let mut cursor = Some(tip);
            while let Some(id) = cursor {
                if !reachable.insert(id) {
                    break;
                }
                cursor = view.get(id)?.parent;
            }
        }

        let evicted: usize = self
            .all()
            .map(|cache| cache.retain(|id| reachable.contains(&id)))
            .sum();
        if evicted > 0 {
            debug!(evicted, live_tips = live_tips.len(), "evicted unreachable version bits cache entries");
        }
        Ok(evicted)
    }
}
