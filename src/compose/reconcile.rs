//! Stretch or shrink a timing plan so the video matches the narration.

use crate::timing::{TimingPlan, MAX_TARGET_SECS, MIN_TARGET_SECS};

/// Largest tolerated gap between video and narration, in seconds.
pub const SYNC_TOLERANCE_SECS: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Plan to encode with
    pub plan: TimingPlan,
    /// Measured narration length
    pub audio_duration: f64,
    /// Narration length clamped to the allowed runtime band
    pub target_duration: f64,
    /// Whether the plan was rescaled
    pub rescaled: bool,
}

/// Rescale `plan` when its crossfade-adjusted runtime drifts more than
/// [`SYNC_TOLERANCE_SECS`] from `audio_duration`.
///
/// All durations are multiplied by the same factor so the displayed
/// runtime lands on the clamped target. Individual durations may leave
/// the per-segment band here: keeping picture and narration aligned wins
/// over the band at this stage.
#[must_use]
pub fn reconcile(plan: &TimingPlan, audio_duration: f64, crossfade: f64) -> Reconciliation {
    let target = audio_duration.clamp(MIN_TARGET_SECS, MAX_TARGET_SECS);
    let video = plan.displayed_duration(crossfade);
    let raw = plan.raw_sum();

    if (video - audio_duration).abs() <= SYNC_TOLERANCE_SECS || raw <= 0.0 {
        return Reconciliation {
            plan: plan.clone(),
            audio_duration,
            target_duration: target,
            rescaled: false,
        };
    }

    let factor = (target + plan.overlap(crossfade)) / raw;
    Reconciliation {
        plan: plan.scaled(factor),
        audio_duration,
        target_duration: target,
        rescaled: true,
    }
}
