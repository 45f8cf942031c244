//! Period Statistics Collector
//!
//! Counts signalling blocks within one period. Only blocks whose top three
//! version bits are `001` are ever counted, so legacy versions that happen to
//! have a deployment's bit set are not misread as votes.

use serde::{Deserialize, Serialize};

use crate::chain::{AncestorView, NodeId};
use crate::constants::{VERSIONBITS_TOP_BITS, VERSIONBITS_TOP_MASK};
use crate::error::{Result, VersionBitsError};
use crate::threshold::ThresholdCondition;

/// Whether `version` signals readiness for the deployment on `bit`
#[inline]
pub fn is_signalling(version: u32, bit: u8) -> bool {
    version & VERSIONBITS_TOP_MASK == VERSIONBITS_TOP_BITS && (version >> bit) & 1 == 1
}

/// Signalling snapshot for the period the next block belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodStatistics {
    /// Index of the open period (height of its first block divided by `period`)
    pub period_index: u64,
    /// Length of the signalling period in blocks
    pub period: u32,
    /// Signalling blocks needed within the period
    pub threshold: u32,
    /// Blocks of the current period already in the chain
    pub elapsed: u32,
    /// Signalling blocks among `elapsed`
    pub count: u32,
    /// Whether lock-in can still be reached before the period closes
    pub possible: bool,
}

impl PeriodStatistics {
    pub fn new(period_index: u64, period: u32, threshold: u32, elapsed: u32, count: u32) -> Self {
        Self {
            period_index,
            period,
            threshold,
            elapsed,
            count,
            possible: lock_in_possible(period, threshold, elapsed, count),
        }
    }

    /// Blocks left before the period closes
    pub fn remaining(&self) -> u32 {
        self.period - self.elapsed
    }
}

/// `count + (period - elapsed) >= threshold`
#[inline]
pub fn lock_in_possible(period: u32, threshold: u32, elapsed: u32, count: u32) -> bool {
    u64::from(count) + u64::from(period.saturating_sub(elapsed)) >= u64::from(threshold)
}

/// Count blocks meeting `condition` among `blocks` blocks ending at `end`
///
/// Walks back through `end` and its ancestors only, at most `blocks` steps.
pub fn count_signalling<C, V>(condition: &C, view: &V, end: NodeId, blocks: u32) -> Result<u32>
where
    C: ThresholdCondition + ?Sized,
    V: AncestorView + ?Sized,
{
    let mut count = 0;
    let mut cursor = end;
    for step in 0..blocks {
        let node = view.get(cursor)?;
        if condition.condition(node) {
            count += 1;
        }
        if step + 1 < blocks {
            cursor = node.parent.ok_or(VersionBitsError::InsufficientHistory {
                height: node.height.saturating_sub(1),
            })?;
        }
    }
    Ok(count)
}

/// Statistics for the period containing the block after `tip`
///
/// `elapsed` counts the blocks of that period already connected, so right
/// after a period closes the snapshot is `elapsed = 0, count = 0`.
pub fn get_state_statistics<C, V>(condition: &C, view: &V, tip: Option<NodeId>) -> Result<PeriodStatistics>
where
    C: ThresholdCondition + ?Sized,
    V: AncestorView + ?Sized,
{
    let period = condition.period();
    let threshold = condition.threshold();
    let Some(tip) = tip else {
        return Ok(PeriodStatistics::new(0, period, threshold, 0, 0));
    };
    let next_height = view.get(tip)?.height + 1;
    let elapsed = (next_height % u64::from(period)) as u32;
    let count = count_signalling(condition, view, tip, elapsed)?;
    Ok(PeriodStatistics::new(
        next_height / u64::from(period),
        period,
        threshold,
        elapsed,
        count,
    ))
}
