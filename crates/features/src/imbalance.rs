//! Diagonal imbalances between adjacent price levels.
//!
//! Top zone: ask volume at a level against bid volume one level below,
//! both levels within the top zone.
//! Bottom zone: bid volume at a level against ask volume one level above.
//! Each count is cumulative over [`IMBALANCE_RATIOS`], so a 5x pair counts
//! once for every ratio.

use trapped_core::{ImbalanceCounts, IMBALANCE_RATIOS};

use crate::levels::LevelProfile;

fn tally(counts: &mut [u32; 4], num: f64, den: f64) {
    // Pairs with nothing on the opposite side carry no information
    if den <= 0.0 {
        return;
    }
    let ratio = num / den;
    for (count, &threshold) in counts.iter_mut().zip(IMBALANCE_RATIOS.iter()) {
        if ratio >= threshold {
            *count += 1;
        }
    }
}

/// Buy imbalances among the top `n` levels.
///
/// Only pairs with both levels inside the zone count, so `n` levels give
/// at most `n - 1` pairs.
pub fn high_zone_imbalances(profile: &LevelProfile, n: usize) -> [u32; 4] {
    let mut counts = [0; 4];
    let zone = profile.high_extremes(n);
    for i in (zone.start + 1..zone.end).rev() {
        tally(
            &mut counts,
            profile.level(i).ask_volume,
            profile.level(i - 1).bid_volume,
        );
    }
    counts
}

/// Sell imbalances among the bottom `n` levels.
pub fn low_zone_imbalances(profile: &LevelProfile, n: usize) -> [u32; 4] {
    let mut counts = [0; 4];
    for i in profile.low_extremes(n) {
        if i + 1 >= profile.len() {
            break;
        }
        tally(
            &mut counts,
            profile.level(i).bid_volume,
            profile.level(i + 1).ask_volume,
        );
    }
    counts
}

/// Imbalances in both zones.
pub fn detect_imbalances(profile: &LevelProfile, n: usize) -> ImbalanceCounts {
    ImbalanceCounts {
        high: high_zone_imbalances(profile, n),
        low: low_zone_imbalances(profile, n),
    }
}
