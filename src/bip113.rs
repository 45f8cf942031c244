//! BIP113: Median Time-Past
//!
//! Median time-past is the clock value version bits compares against a
//! deployment's start time and timeout when the chain is configured with
//! [`ClockRule::MedianTimePast`](crate::chain::ClockRule::MedianTimePast).
//!
//! Specification: https://github.com/bitcoin/bips/blob/master/bip-0113.mediawiki

pub use crate::constants::MEDIAN_TIME_SPAN;

/// Median of up to the last [`MEDIAN_TIME_SPAN`] timestamps
///
/// `timestamps` may be in any order. For an even count the upper of the two
/// middle values is returned, matching how block index median time is taken
/// (no averaging). Returns 0 for an empty slice.
///
/// # Example
///
/// ```rust
/// use blvm_versionbits::bip113::median_time;
///
/// assert_eq!(median_time(&[3000, 1000, 2000]), 2000);
/// ```
pub fn median_time(timestamps: &[u64]) -> u64 {
    if timestamps.is_empty() {
        return 0;
    }

    let start_idx = timestamps.len().saturating_sub(MEDIAN_TIME_SPAN);
    let mut recent: Vec<u64> = timestamps[start_idx..].to_vec();
    recent.sort_unstable();
    recent[recent.len() / 2]
}
