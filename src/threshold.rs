//! Threshold State Engine
//!
//! Computes the BIP9 state of a condition for the block that would follow a
//! given `prev` block. State is a pure function of chain history: it is only
//! re-evaluated at period boundaries (the last block of each period), and
//! every boundary result is memoized in a [`StateCache`] keyed by the
//! boundary's node identity.
//!
//! ```text
//! DEFINED -> STARTED -> LOCKED_IN -> ACTIVE
//!     |         |
//!     +---------+-----> FAILED
//! ```
//!
//! A query on a chain whose boundaries are all cached costs one ancestor
//! lookup. A never-seen branch costs one statistics pass per uncached period
//! back to the nearest cached boundary (or, under median time-past, the start
//! time).

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

use crate::cache::{CachedState, StateCache};
use crate::chain::{AncestorView, ChainNode, ClockRule, NodeId};
use crate::error::Result;
use crate::statistics::count_signalling;
use crate::types::Height;

/// BIP9 deployment states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdState {
    /// First state of every deployment; genesis is always in this state
    Defined,
    /// Start time reached, blocks are counted each period
    Started,
    /// Threshold met during a full period; activates one period later
    LockedIn,
    /// Rule enforced for all following blocks (final)
    Active,
    /// Timeout reached without lock-in (final)
    Failed,
}

impl ThresholdState {
    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdState::Defined => "defined",
            ThresholdState::Started => "started",
            ThresholdState::LockedIn => "locked_in",
            ThresholdState::Active => "active",
            ThresholdState::Failed => "failed",
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ThresholdState::Active | ThresholdState::Failed)
    }

    /// Whether miners should set the bit in this state
    #[inline]
    pub fn is_signalling_phase(self) -> bool {
        matches!(self, ThresholdState::Started | ThresholdState::LockedIn)
    }

    /// Position along the state path, used to check forward-only movement
    ///
    /// `Failed` ranks after `Started` only; it is never comparable with
    /// `LockedIn` or `Active` since no chain reaches both.
    pub fn rank(self) -> u8 {
        match self {
            ThresholdState::Defined => 0,
            ThresholdState::Started => 1,
            ThresholdState::LockedIn | ThresholdState::Failed => 2,
            ThresholdState::Active => 3,
        }
    }
}

impl fmt::Display for ThresholdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters and per-block vote of a thresholded state machine
///
/// Implemented by deployments and by the unknown-bit trackers in
/// [`warnings`](crate::warnings), which share the same engine.
pub trait ThresholdCondition {
    fn begin_time(&self) -> u64;
    fn end_time(&self) -> u64;
    fn period(&self) -> u32;
    fn threshold(&self) -> u32;

    fn min_activation_height(&self) -> Height {
        0
    }

    /// Whether `node` votes for this condition
    fn condition(&self, node: &ChainNode) -> bool;
}

/// Last block of the most recently closed period as seen from `prev`
///
/// `None` when no period has closed yet (`prev.height < period - 1`).
pub fn period_boundary<V>(view: &V, prev: NodeId, period: u32) -> Result<Option<NodeId>>
where
    V: AncestorView + ?Sized,
{
    let period = u64::from(period);
    let height = view.get(prev)?.height;
    if height + 1 < period {
        return Ok(None);
    }
    let boundary_height = height - ((height + 1) % period);
    view.ancestor(prev, boundary_height).map(Some)
}

/// State and since-height for the block following `prev`
///
/// `prev = None` means the block in question is genesis.
pub fn get_state_and_since<C, V>(
    condition: &C,
    view: &V,
    cache: &StateCache,
    clock: ClockRule,
    prev: Option<NodeId>,
) -> Result<CachedState>
where
    C: ThresholdCondition + ?Sized,
    V: AncestorView + ?Sized,
{
    let Some(prev) = prev else {
        return Ok(CachedState::INITIAL);
    };
    let period = condition.period();
    let mut boundary = period_boundary(view, prev, period)?;

    // Walk back to the nearest boundary whose state is known
    let mut to_compute = Vec::new();
    let mut known = loop {
        let Some(id) = boundary else {
            break CachedState::INITIAL;
        };
        if let Some(cached) = cache.get(id) {
            trace!(boundary = %id, state = %cached.state, "version bits cache hit");
            break cached;
        }
        // Median time-past never decreases along a chain, so nothing at or
        // below a boundary before the start time can have left DEFINED.
        // Block timestamps may go backwards, so that clock walks to the end.
        if clock.is_monotone() && view.clock_time(id, clock)? < condition.begin_time() {
            cache.insert(id, CachedState::INITIAL);
            break CachedState::INITIAL;
        }
        to_compute.push(id);
        let height = view.get(id)?.height;
        boundary = if height >= u64::from(period) {
            Some(view.ancestor(id, height - u64::from(period))?)
        } else {
            None
        };
    };

    // Replay forward from the oldest uncached boundary
    while let Some(id) = to_compute.pop() {
        let node = view.get(id)?;
        let next = next_state(condition, view, clock, id, known.state)?;
        if next != known.state {
            debug!(
                boundary = %node.hash,
                height = node.height,
                from = %known.state,
                to = %next,
                "version bits state transition"
            );
            known = CachedState {
                state: next,
                since: node.height + 1,
            };
        }
        cache.insert(id, known);
    }

    Ok(known)
}

/// State for the block following `prev`
pub fn get_state_for<C, V>(
    condition: &C,
    view: &V,
    cache: &StateCache,
    clock: ClockRule,
    prev: Option<NodeId>,
) -> Result<ThresholdState>
where
    C: ThresholdCondition + ?Sized,
    V: AncestorView + ?Sized,
{
    get_state_and_since(condition, view, cache, clock, prev).map(|s| s.state)
}

/// Height of the first block to which the current state applied
pub fn get_state_since_height_for<C, V>(
    condition: &C,
    view: &V,
    cache: &StateCache,
    clock: ClockRule,
    prev: Option<NodeId>,
) -> Result<Height>
where
    C: ThresholdCondition + ?Sized,
    V: AncestorView + ?Sized,
{
    get_state_and_since(condition, view, cache, clock, prev).map(|s| s.since)
}

/// Transition applied at `boundary`, given the state of the period it closes
fn next_state<C, V>(
    condition: &C,
    view: &V,
    clock: ClockRule,
    boundary: NodeId,
    previous: ThresholdState,
) -> Result<ThresholdState>
where
    C: ThresholdCondition + ?Sized,
    V: AncestorView + ?Sized,
{
    let next = match previous {
        ThresholdState::Defined => {
            let time = view.clock_time(boundary, clock)?;
            if time >= condition.end_time() {
                ThresholdState::Failed
            } else if time >= condition.begin_time() {
                ThresholdState::Started
            } else {
                ThresholdState::Defined
            }
        }
        ThresholdState::Started => {
            if view.clock_time(boundary, clock)? >= condition.end_time() {
                ThresholdState::Failed
            } else if count_signalling(condition, view, boundary, condition.period())?
                >= condition.threshold()
            {
                ThresholdState::LockedIn
            } else {
                ThresholdState::Started
            }
        }
        ThresholdState::LockedIn => {
            if view.get(boundary)?.height + 1 >= condition.min_activation_height() {
                ThresholdState::Active
            } else {
                ThresholdState::LockedIn
            }
        }
        ThresholdState::Active | ThresholdState::Failed => previous,
    };
    Ok(next)
}
