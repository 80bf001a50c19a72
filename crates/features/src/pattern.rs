//! Pattern classification of a triggered bar.
//!
//! Each axis (position, divergence, imbalance coherence, exhaustion) is
//! computed independently. Imbalances and exhaustion are restricted to the
//! zone(s) implied by the trigger position.

use serde::{Deserialize, Serialize};
use trapped_core::config::TriggerConfig;
use trapped_core::{
    Direction, Exhaustion, ImbalanceCoherence, ImbalanceCounts, RangeBar, TriggerPosition,
};
use tracing::trace;

use crate::exhaustion::{high_zone_exhaustion, low_zone_exhaustion};
use crate::imbalance::{high_zone_imbalances, low_zone_imbalances};
use crate::levels::LevelProfile;
use crate::trigger::{is_triggered, side_conditions};

/// Zone counts at or above this are coherent.
const COHERENT_MIN_COUNT: u32 = 3;

/// Trigger position from the per-side conditions.
pub fn classify_trigger_position(profile: &LevelProfile, config: &TriggerConfig) -> TriggerPosition {
    let sides = side_conditions(profile, config);
    match (sides.high, sides.low) {
        (true, true) => TriggerPosition::Both,
        (true, false) => TriggerPosition::High,
        (false, true) => TriggerPosition::Low,
        (false, false) => TriggerPosition::Neutral,
    }
}

/// Order flow disagrees with the bar's close direction.
pub fn is_divergent(delta: f64, direction: Direction) -> bool {
    (delta > 0.0 && direction == Direction::Down) || (delta < 0.0 && direction == Direction::Up)
}

/// Imbalances in the zone(s) implied by `position`; other zones stay zero.
pub fn imbalances_for_position(
    profile: &LevelProfile,
    position: TriggerPosition,
    n: usize,
) -> ImbalanceCounts {
    let mut counts = ImbalanceCounts::default();
    if position.covers_high() {
        counts.high = high_zone_imbalances(profile, n);
    }
    if position.covers_low() {
        counts.low = low_zone_imbalances(profile, n);
    }
    counts
}

/// Coherence between the trigger position and its zone imbalances.
pub fn imbalance_coherence(position: TriggerPosition, counts: &ImbalanceCounts) -> ImbalanceCoherence {
    let grade = |total: u32| {
        if total >= COHERENT_MIN_COUNT {
            ImbalanceCoherence::Coherent
        } else if total >= 1 {
            ImbalanceCoherence::Weak
        } else {
            ImbalanceCoherence::Incoherent
        }
    };

    match position {
        TriggerPosition::High => grade(counts.high_total()),
        TriggerPosition::Low => grade(counts.low_total()),
        TriggerPosition::Both => {
            let (high, low) = (counts.high_total(), counts.low_total());
            if high >= 1 && low >= 1 {
                ImbalanceCoherence::Coherent
            } else if high >= 1 || low >= 1 {
                ImbalanceCoherence::Weak
            } else {
                ImbalanceCoherence::Incoherent
            }
        }
        TriggerPosition::Neutral => ImbalanceCoherence::None,
    }
}

/// Exhaustion in the zone(s) implied by `position`. For `Both` the top zone
/// is checked first.
pub fn exhaustion_for_position(
    profile: &LevelProfile,
    position: TriggerPosition,
    n: usize,
    threshold: f64,
) -> Exhaustion {
    if position.covers_high() {
        let ex = high_zone_exhaustion(profile, n, threshold);
        if ex.has_exhaustion {
            return ex;
        }
    }
    if position.covers_low() {
        return low_zone_exhaustion(profile, n, threshold);
    }
    Exhaustion::none()
}

/// All classification axes of one triggered bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarPattern {
    pub trigger_position: TriggerPosition,
    pub is_divergent: bool,
    pub imbalances: ImbalanceCounts,
    pub imbalance_coherence: ImbalanceCoherence,
    pub exhaustion: Exhaustion,
}

/// Trigger detection plus classification for one parameter set.
#[derive(Debug, Clone, Copy)]
pub struct PatternClassifier {
    config: TriggerConfig,
}

impl PatternClassifier {
    /// Create a classifier for the given thresholds.
    pub fn new(config: TriggerConfig) -> Self {
        Self { config }
    }

    /// Thresholds in use.
    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Classify a bar, or `None` if it does not trigger.
    pub fn classify(&self, bar: &RangeBar) -> Option<BarPattern> {
        let profile = LevelProfile::new(&bar.levels);
        if !is_triggered(&profile, &self.config) {
            return None;
        }

        let n = self.config.n_extremes;
        let position = classify_trigger_position(&profile, &self.config);
        let imbalances = imbalances_for_position(&profile, position, n);
        let pattern = BarPattern {
            trigger_position: position,
            is_divergent: is_divergent(bar.delta, bar.direction),
            imbalance_coherence: imbalance_coherence(position, &imbalances),
            imbalances,
            exhaustion: exhaustion_for_position(
                &profile,
                position,
                n,
                self.config.exhaustion_threshold,
            ),
        };
        trace!(
            open_time = %bar.open_time,
            position = %pattern.trigger_position,
            divergent = pattern.is_divergent,
            coherence = %pattern.imbalance_coherence,
            "bar triggered"
        );
        Some(pattern)
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(TriggerConfig::default())
    }
}
