//! Chain Ancestor View
//!
//! Read-only access to the block tree for version bits evaluation: height,
//! timestamp, version and parent linkage. Chain management owns the nodes;
//! the engine only ever follows `parent` links backwards.
//!
//! [`ChainIndex`] is an arena of [`ChainNode`]s indexed by [`NodeId`] with a
//! height-indexed active chain, so ancestor lookups on the active chain are
//! O(1) and lookups on side branches walk only until they meet the active
//! chain.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::bip113::median_time;
use crate::constants::MEDIAN_TIME_SPAN;
use crate::error::{Result, VersionBitsError};
use crate::types::{BlockHash, BlockHeader, Height};

/// Identity of a node in the chain arena
///
/// Two blocks at the same height on different forks always have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One block on some candidate chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNode {
    pub hash: BlockHash,
    pub height: Height,
    pub timestamp: u64,
    pub version: u32,
    /// Non-owning back-reference; `None` for genesis or a pruned/snapshot base
    pub parent: Option<NodeId>,
}

/// Which clock value of a period's last block governs start time and timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockRule {
    /// The block's own header timestamp
    BlockTime,
    /// Median of the last 11 block timestamps (BIP113)
    #[default]
    MedianTimePast,
}

impl ClockRule {
    /// Whether the clock value can never decrease from parent to child
    ///
    /// BIP113 requires every timestamp to exceed its parent's median
    /// time-past, which makes the median non-decreasing. Header timestamps
    /// alone carry no such guarantee.
    #[inline]
    pub fn is_monotone(self) -> bool {
        matches!(self, ClockRule::MedianTimePast)
    }
}

impl FromStr for ClockRule {
    type Err = VersionBitsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block_time" | "blocktime" => Ok(ClockRule::BlockTime),
            "median_time_past" | "mediantimepast" | "mtp" => Ok(ClockRule::MedianTimePast),
            other => Err(VersionBitsError::Config(
                format!("unknown clock rule '{other}'").into(),
            )),
        }
    }
}

/// Read-only ancestor access supplied by chain management
pub trait AncestorView {
    /// Node for `id`, or `None` if the arena does not know it
    fn node(&self, id: NodeId) -> Option<&ChainNode>;

    fn get(&self, id: NodeId) -> Result<&ChainNode> {
        self.node(id).ok_or(VersionBitsError::UnknownNode(id.index()))
    }

    /// Ancestor of `id` at `height`
    ///
    /// Fails with [`VersionBitsError::InsufficientHistory`] when the walk runs
    /// off the stored history before reaching `height`.
    fn ancestor(&self, id: NodeId, height: Height) -> Result<NodeId> {
        let mut current = id;
        let mut node = self.get(id)?;
        if height > node.height {
            return Err(VersionBitsError::InvalidAncestorHeight {
                requested: height,
                height: node.height,
            });
        }
        while node.height > height {
            current = node.parent.ok_or(VersionBitsError::InsufficientHistory {
                height: node.height - 1,
            })?;
            node = self.get(current)?;
        }
        Ok(current)
    }

    /// Median time-past of `id` over its last 11 blocks
    ///
    /// Near genesis fewer blocks exist and all of them are used. Running off a
    /// pruned or snapshot base before 11 blocks are collected is
    /// [`VersionBitsError::InsufficientHistory`].
    fn median_time_past(&self, id: NodeId) -> Result<u64> {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut current = id;
        loop {
            let node = self.get(current)?;
            timestamps.push(node.timestamp);
            if timestamps.len() == MEDIAN_TIME_SPAN {
                break;
            }
            match node.parent {
                Some(parent) => current = parent,
                None if node.height == 0 => break,
                None => {
                    return Err(VersionBitsError::InsufficientHistory {
                        height: node.height - 1,
                    })
                }
            }
        }
        Ok(median_time(&timestamps))
    }

    /// Clock value of `id` under `rule`
    fn clock_time(&self, id: NodeId, rule: ClockRule) -> Result<u64> {
        match rule {
            ClockRule::BlockTime => Ok(self.get(id)?.timestamp),
            ClockRule::MedianTimePast => self.median_time_past(id),
        }
    }
}

/// In-memory block tree with an active chain
#[derive(Debug, Default, Clone)]
pub struct ChainIndex {
    nodes: Vec<ChainNode>,
    by_hash: HashMap<BlockHash, NodeId>,
    /// Active chain, `active[i]` is the node at height `active_base + i`
    active: Vec<NodeId>,
    active_base: Height,
}

impl ChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn lookup(&self, hash: &BlockHash) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    /// Like [`lookup`](Self::lookup), for callers that only hold a hash
    pub fn require(&self, hash: &BlockHash) -> Result<NodeId> {
        self.lookup(hash)
            .ok_or_else(|| VersionBitsError::UnknownBlock(hash.to_hex()))
    }

    /// Tip of the active chain
    pub fn tip(&self) -> Option<NodeId> {
        self.active.last().copied()
    }

    /// Active chain node at `height`
    pub fn active_at(&self, height: Height) -> Option<NodeId> {
        let offset = height.checked_sub(self.active_base)?;
        self.active.get(usize::try_from(offset).ok()?).copied()
    }

    pub fn is_on_active_chain(&self, id: NodeId) -> bool {
        self.node(id)
            .map_or(false, |node| self.active_at(node.height) == Some(id))
    }

    /// Insert the genesis block (height 0, no parent)
    pub fn insert_genesis(&mut self, header: &BlockHeader) -> Result<NodeId> {
        self.insert_node(header, None, 0)
    }

    /// Insert a block whose ancestors are not stored (pruned or snapshot base)
    ///
    /// Queries that need history below `height` fail with
    /// [`VersionBitsError::InsufficientHistory`].
    pub fn insert_detached(&mut self, header: &BlockHeader, height: Height) -> Result<NodeId> {
        self.insert_node(header, None, height)
    }

    /// Insert a block whose parent is already known
    ///
    /// Inserting a block twice returns the existing id.
    pub fn insert(&mut self, header: &BlockHeader) -> Result<NodeId> {
        let parent =
            self.lookup(&header.prev_block_hash)
                .ok_or_else(|| VersionBitsError::OrphanHeader {
                    hash: header.hash().to_hex(),
                    parent: header.prev_block_hash.to_hex(),
                })?;
        let height = self.get(parent)?.height + 1;
        self.insert_node(header, Some(parent), height)
    }

    fn insert_node(
        &mut self,
        header: &BlockHeader,
        parent: Option<NodeId>,
        height: Height,
    ) -> Result<NodeId> {
        // The hash only commits to the low 32 bits of the timestamp
        if header.timestamp > u64::from(u32::MAX) {
            return Err(VersionBitsError::TimestampOutOfRange(header.timestamp));
        }
        let hash = header.hash();
        if let Some(id) = self.lookup(&hash) {
            return Ok(id);
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(ChainNode {
            hash,
            height,
            timestamp: header.timestamp,
            version: header.version,
            parent,
        });
        self.by_hash.insert(hash, id);
        Ok(id)
    }

    /// Make `id` the active tip, rewinding to the fork point if needed
    ///
    /// Returns the number of blocks disconnected from the previous active chain.
    pub fn set_tip(&mut self, id: NodeId) -> Result<u64> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        let mut fork_point = None;
        while let Some(current) = cursor {
            if self.is_on_active_chain(current) {
                fork_point = Some(current);
                break;
            }
            path.push(current);
            cursor = self.get(current)?.parent;
        }

        let previous_len = self.active.len() as u64;
        match fork_point {
            Some(fork) => {
                let keep = self.get(fork)?.height - self.active_base + 1;
                self.active.truncate(keep as usize);
            }
            None => {
                self.active.clear();
                if let Some(&base) = path.last() {
                    self.active_base = self.get(base)?.height;
                }
            }
        }
        let disconnected = previous_len.saturating_sub(self.active.len() as u64);
        self.active.extend(path.into_iter().rev());

        let tip = self.get(id)?;
        debug!(
            tip = %tip.hash,
            height = tip.height,
            disconnected,
            "active chain tip updated"
        );
        Ok(disconnected)
    }
}

impl AncestorView for ChainIndex {
    fn node(&self, id: NodeId) -> Option<&ChainNode> {
        self.nodes.get(id.0)
    }

    fn ancestor(&self, id: NodeId, height: Height) -> Result<NodeId> {
        let mut current = id;
        let mut node = self.get(id)?;
        if height > node.height {
            return Err(VersionBitsError::InvalidAncestorHeight {
                requested: height,
                height: node.height,
            });
        }
        loop {
            if node.height == height {
                return Ok(current);
            }
            if self.active_at(node.height) == Some(current) {
                // Everything below an active node is the active chain itself
                return self
                    .active_at(height)
                    .ok_or(VersionBitsError::InsufficientHistory { height });
            }
            current = node.parent.ok_or(VersionBitsError::InsufficientHistory {
                height: node.height - 1,
            })?;
            node = self.get(current)?;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_insert_and_heights() {
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let tip = mine(&mut index, g, 10, 4);
        assert_eq!(index.get(tip).unwrap().height, 10);
        assert_eq!(index.len(), 11);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let header = BlockHeader {
            version: 4,
            prev_block_hash: index.get(g).unwrap().hash,
            merkle_root: [0u8; 32],
            timestamp: GENESIS_TIME + 1,
            bits: 0,
            nonce: 99,
        };
        let a = index.insert(&header).unwrap();
        let b = index.insert(&header).unwrap();
        assert_eq!(a, b);
        assert_eq!(index.len(), 2);
        assert_eq!(index.require(&header.hash()).unwrap(), a);
        assert!(matches!(
            index.require(&BlockHash([3u8; 32])),
            Err(VersionBitsError::UnknownBlock(_))
        ));
    }

    #[test]
    fn test_orphan_header_rejected() {
        let mut index = ChainIndex::new();
        genesis(&mut index);
        let header = BlockHeader {
            version: 4,
            prev_block_hash: BlockHash([7u8; 32]),
            merkle_root: [0u8; 32],
            timestamp: GENESIS_TIME,
            bits: 0,
            nonce: 0,
        };
        assert!(matches!(
            index.insert(&header),
            Err(VersionBitsError::OrphanHeader { .. })
        ));
    }

    #[test]
    fn test_ancestor_on_active_and_side_chain() {
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let fork = mine(&mut index, g, 5, 4);
        let main_tip = mine(&mut index, fork, 10, 4);
        let side_tip = mine(&mut index, fork, 3, 0x2000_0000);
        index.set_tip(main_tip).unwrap();

        let main_at_3 = index.ancestor(main_tip, 3).unwrap();
        let side_at_3 = index.ancestor(side_tip, 3).unwrap();
        assert_eq!(main_at_3, side_at_3);

        let side_at_7 = index.ancestor(side_tip, 7).unwrap();
        let main_at_7 = index.ancestor(main_tip, 7).unwrap();
        assert_ne!(side_at_7, main_at_7);
        assert_eq!(index.get(side_at_7).unwrap().height, 7);
        assert!(!index.is_on_active_chain(side_at_7));
    }

    #[test]
    fn test_ancestor_above_height_is_error() {
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        assert!(matches!(
            index.ancestor(g, 1),
            Err(VersionBitsError::InvalidAncestorHeight { .. })
        ));
    }

    #[test]
    fn test_set_tip_reorg_reports_disconnected() {
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let fork = mine(&mut index, g, 5, 4);
        let a = mine(&mut index, fork, 4, 4);
        let b = mine(&mut index, fork, 6, 4);
        assert_eq!(index.set_tip(a).unwrap(), 0);
        assert_eq!(index.set_tip(b).unwrap(), 4);
        assert_eq!(index.tip(), Some(b));
        assert_eq!(index.active_at(11), Some(b));
        assert!(!index.is_on_active_chain(a));
    }

    #[test]
    fn test_detached_base_reports_insufficient_history() {
        let mut index = ChainIndex::new();
        let base = index.insert_detached(
            &BlockHeader {
                version: 4,
                prev_block_hash: BlockHash([1u8; 32]),
                merkle_root: [0u8; 32],
                timestamp: GENESIS_TIME,
                bits: 0,
                nonce: 0,
            },
            1000,
        )
        .unwrap();
        index.set_tip(base).unwrap();
        let tip = mine(&mut index, base, 5, 4);
        index.set_tip(tip).unwrap();
        assert_eq!(index.ancestor(tip, 1000).unwrap(), base);
        assert_eq!(
            index.ancestor(tip, 999),
            Err(VersionBitsError::InsufficientHistory { height: 999 })
        );
    }

    #[test]
    fn test_clock_rules() {
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let tip = mine(&mut index, g, 20, 4);
        let tip_time = index.get(tip).unwrap().timestamp;
        assert_eq!(index.clock_time(tip, ClockRule::BlockTime).unwrap(), tip_time);
        // One second spacing: median of the last 11 is 5 seconds behind the tip
        assert_eq!(
            index.clock_time(tip, ClockRule::MedianTimePast).unwrap(),
            tip_time - 5
        );
    }

    #[test]
    fn test_median_time_near_genesis_uses_all_blocks() {
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let tip = mine(&mut index, g, 3, 4);
        // Four timestamps, upper middle value
        assert_eq!(index.median_time_past(tip).unwrap(), GENESIS_TIME + 2);
    }

    #[test]
    fn test_median_time_on_detached_base_needs_eleven_blocks() {
        let mut index = ChainIndex::new();
        let base = index
            .insert_detached(
                &BlockHeader {
                    version: 4,
                    prev_block_hash: BlockHash([1u8; 32]),
                    merkle_root: [0u8; 32],
                    timestamp: GENESIS_TIME,
                    bits: 0,
                    nonce: 0,
                },
                112,
            )
            .unwrap();
        let short = mine(&mut index, base, 7, 4);
        assert_eq!(
            index.median_time_past(short),
            Err(VersionBitsError::InsufficientHistory { height: 111 })
        );
        assert_eq!(
            index.clock_time(short, ClockRule::MedianTimePast),
            Err(VersionBitsError::InsufficientHistory { height: 111 })
        );
        assert!(index.clock_time(short, ClockRule::BlockTime).is_ok());

        let full = mine(&mut index, short, 3, 4);
        assert_eq!(index.median_time_past(full).unwrap(), GENESIS_TIME + 5);
    }

    #[test]
    fn test_timestamp_beyond_header_field_rejected() {
        let mut index = ChainIndex::new();
        let g = genesis(&mut index);
        let parent = index.get(g).unwrap().hash;
        let header = |timestamp| BlockHeader {
            version: 4,
            prev_block_hash: parent,
            merkle_root: [0u8; 32],
            timestamp,
            bits: 0,
            nonce: 1,
        };
        let low = index.insert(&header(GENESIS_TIME + 1)).unwrap();
        // Same low 32 bits, so the same header hash if it were accepted
        assert_eq!(
            index.insert(&header(GENESIS_TIME + 1 + (1u64 << 32))),
            Err(VersionBitsError::TimestampOutOfRange(GENESIS_TIME + 1 + (1u64 << 32)))
        );
        assert!(index.insert(&header(u64::from(u32::MAX))).is_ok());
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(low).unwrap().timestamp, GENESIS_TIME + 1);
    }

    #[test]
    fn test_clock_rule_parsing() {
        assert_eq!("mtp".parse::<ClockRule>().unwrap(), ClockRule::MedianTimePast);
        assert_eq!("block_time".parse::<ClockRule>().unwrap(), ClockRule::BlockTime);
        assert!("wallclock".parse::<ClockRule>().is_err());
    }
}
