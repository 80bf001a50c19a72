//! Exhaustion: a sharp drop in aggressive volume between adjacent levels.
//!
//! Each zone is walked from the bar extreme inward. The first adjacent pair
//! where the inner level's same-side volume is at most `threshold` times the
//! outer level's is reported; later pairs are not examined.

use trapped_core::{Exhaustion, ExhaustionType};

use crate::levels::LevelProfile;

fn first_collapse(
    profile: &LevelProfile,
    order: &[usize],
    volume: impl Fn(usize) -> f64,
    threshold: f64,
    kind: ExhaustionType,
) -> Exhaustion {
    for pair in order.windows(2) {
        let (outer, inner) = (pair[0], pair[1]);
        let outer_vol = volume(outer);
        if outer_vol <= 0.0 {
            continue;
        }
        let inner_vol = volume(inner);
        if inner_vol <= outer_vol * threshold {
            return Exhaustion {
                has_exhaustion: true,
                kind,
                ratio: inner_vol / outer_vol,
                levels: Some((profile.price(outer), profile.price(inner))),
            };
        }
    }
    Exhaustion::none()
}

/// Ask collapse among the top `n` levels, scanning down from the high.
pub fn high_zone_exhaustion(profile: &LevelProfile, n: usize, threshold: f64) -> Exhaustion {
    let order: Vec<usize> = profile.high_extremes(n).rev().collect();
    first_collapse(
        profile,
        &order,
        |i| profile.level(i).ask_volume,
        threshold,
        ExhaustionType::AskHigh,
    )
}

/// Bid collapse among the bottom `n` levels, scanning up from the low.
pub fn low_zone_exhaustion(profile: &LevelProfile, n: usize, threshold: f64) -> Exhaustion {
    let order: Vec<usize> = profile.low_extremes(n).collect();
    first_collapse(
        profile,
        &order,
        |i| profile.level(i).bid_volume,
        threshold,
        ExhaustionType::BidLow,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::tests::make_levels;

    #[test]
    fn test_ask_collapse_at_high() {
        // ask = [100, 100, 5] top to bottom
        let levels = make_levels(&[
            (99.75, 1.0, 1.0, 0.0),
            (100.0, 5.0, 0.0, 5.0),
            (100.25, 100.0, 0.0, 100.0),
            (100.5, 100.0, 0.0, 100.0),
        ]);
        let profile = LevelProfile::new(&levels);
        let ex = high_zone_exhaustion(&profile, 3, 0.1);

        assert!(ex.has_exhaustion);
        assert_eq!(ex.kind, ExhaustionType::AskHigh);
        assert!((ex.ratio - 0.05).abs() < 1e-10);
        assert_eq!(ex.levels, Some((100.25, 100.0)));
    }

    #[test]
    fn test_first_match_wins() {
        let levels = make_levels(&[
            (100.0, 50.0, 50.0, 0.0),
            (100.25, 1.0, 1.0, 0.0),
            (100.5, 0.0, 0.0, 0.0),
        ]);
        let profile = LevelProfile::new(&levels);
        let ex = low_zone_exhaustion(&profile, 3, 0.1);

        assert_eq!(ex.kind, ExhaustionType::BidLow);
        assert_eq!(ex.levels, Some((100.0, 100.25)));
        assert!((ex.ratio - 0.02).abs() < 1e-10);
    }

    #[test]
    fn test_no_exhaustion() {
        let levels = make_levels(&[
            (100.0, 10.0, 5.0, 5.0),
            (100.25, 10.0, 5.0, 5.0),
            (100.5, 10.0, 5.0, 5.0),
        ]);
        let profile = LevelProfile::new(&levels);
        assert_eq!(high_zone_exhaustion(&profile, 3, 0.25), Exhaustion::none());
        assert_eq!(low_zone_exhaustion(&profile, 3, 0.25), Exhaustion::none());
        // One level has no adjacent pair
        assert!(!high_zone_exhaustion(&profile, 1, 1.0).has_exhaustion);
    }

    #[test]
    fn test_empty_outer_level_skipped() {
        // Top level has no ask volume, so the first usable pair is lower
        let levels = make_levels(&[
            (100.0, 1.0, 0.0, 0.0),
            (100.25, 20.0, 0.0, 20.0),
            (100.5, 1.0, 1.0, 0.0),
        ]);
        let profile = LevelProfile::new(&levels);
        let ex = high_zone_exhaustion(&profile, 3, 0.1);
        assert_eq!(ex.levels, Some((100.25, 100.0)));
        assert_eq!(ex.ratio, 0.0);
    }
}
