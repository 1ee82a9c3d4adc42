//! The difficulty retarget rule.
//!
//! Every `retarget_interval` blocks, the elapsed time over the previous
//! interval is compared to the target span (`retarget_interval ×
//! target_block_time`). The ratio is clamped to `[¼, 4]` and the new
//! difficulty is the old difficulty scaled by its inverse, so a fast
//! interval raises difficulty and a slow one lowers it, by at most 4× per
//! retarget in either direction.

use ember_chain::parameters::NetworkParameters;
use tracing::debug;

/// Scale `old` difficulty by `target_span / actual_span`, with the span
/// ratio clamped to `[¼, 4]` first.
pub fn retarget(old: u32, actual_span: u64, target_span: u64) -> u32 {
    let actual_span = actual_span.clamp(target_span / 4, target_span.saturating_mul(4)).max(1);
    let scaled = (old as u128) * (target_span as u128) / (actual_span as u128);
    let new = scaled.min(u32::MAX as u128).max(1) as u32;
    if new != old {
        debug!(old, new, actual_span, target_span, "difficulty retarget");
    }
    new
}

/// The difficulty expected of a block at `candidate_height` whose parent
/// mined at `parent_difficulty`.
///
/// `interval_times` carries the timestamps of the first and last blocks of
/// the just-finished interval, and is consulted only at retarget heights.
pub fn next_difficulty(
    params: &NetworkParameters,
    candidate_height: u64,
    parent_difficulty: u32,
    interval_times: Option<(u64, u64)>,
) -> u32 {
    if candidate_height == 0 {
        return params.initial_difficulty;
    }
    if candidate_height % params.retarget_interval != 0 {
        return parent_difficulty;
    }
    let target_span = params.retarget_interval * params.target_block_time;
    match interval_times {
        Some((first, last)) => retarget(parent_difficulty, last.saturating_sub(first), target_span),
        // Without a full window (can only happen at the first interval of a
        // short test chain) the difficulty carries over.
        None => parent_difficulty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_target_interval_is_unchanged() {
        assert_eq!(retarget(1000, 600, 600), 1000);
    }

    #[test]
    fn fast_interval_raises_difficulty() {
        // Blocks arrived in half the target time: difficulty doubles.
        assert_eq!(retarget(1000, 300, 600), 2000);
    }

    #[test]
    fn slow_interval_lowers_difficulty() {
        assert_eq!(retarget(1000, 1200, 600), 500);
    }

    #[test]
    fn adjustment_is_clamped_to_4x() {
        // A hundred-fold burst still only quadruples difficulty.
        assert_eq!(retarget(1000, 6, 600), 4000);
        // And a stall only quarters it.
        assert_eq!(retarget(1000, 60_000, 600), 250);
    }

    #[test]
    fn difficulty_never_reaches_zero() {
        assert_eq!(retarget(1, 2400, 600), 1);
    }

    #[test]
    fn non_retarget_heights_inherit_parent() {
        let params = NetworkParameters::test();
        assert_eq!(next_difficulty(&params, 3, 7, None), 7);
        assert_eq!(
            next_difficulty(&params, params.retarget_interval, 7, Some((0, 40))),
            retarget(7, 40, params.retarget_interval * params.target_block_time)
        );
    }
}
