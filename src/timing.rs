//! Per-segment display durations derived from narration text.
//!
//! Each voiceover gets a weight from its word, character and punctuation
//! counts (boosted for emphasis and call-to-action language). A target
//! runtime between 25 and 40 seconds is picked from the average segment
//! length, then shared out in proportion to weight and clamped to the
//! per-segment band.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::segment::Segment;

/// Shortest time a segment may stay on screen.
pub const MIN_SEGMENT_SECS: f64 = 2.5;
/// Longest time a segment may stay on screen.
pub const MAX_SEGMENT_SECS: f64 = 12.0;
/// Lower bound of the overall target runtime.
pub const MIN_TARGET_SECS: f64 = 25.0;
/// Upper bound of the overall target runtime.
pub const MAX_TARGET_SECS: f64 = 40.0;
/// Overlap between consecutive segments.
pub const CROSSFADE_SECS: f64 = 1.0;

/// Average words per segment at which the target saturates at 40s.
const FULL_COMPLEXITY_WORDS: f64 = 15.0;
const MIN_WEIGHT: f64 = 2.0;
const EMPHASIS_BOOST: f64 = 1.2;
const CALL_TO_ACTION_BOOST: f64 = 1.1;

const MAX_REBALANCE_PASSES: usize = 256;
const CONVERGENCE_EPSILON: f64 = 1e-6;
const SETTLED_EPSILON: f64 = 1e-9;

static EMPHASIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)!|\b(important|urgent|critical|crucial|essential|vital|never|must|warning|breaking|exclusive|guaranteed)\b",
    )
    .expect("emphasis pattern is valid")
});

static CALL_TO_ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(today|now|contact|call|visit|subscribe|sign up|join|book|order|buy|shop|download|learn more|get started|click)\b",
    )
    .expect("call-to-action pattern is valid")
});

/// Ordered display durations, one per segment, in seconds.
///
/// Plans are values: rescaling produces a new plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimingPlan(Vec<f64>);

impl TimingPlan {
    #[must_use]
    pub fn new(durations: Vec<f64>) -> Self {
        Self(durations)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of durations before crossfade overlap is subtracted.
    #[must_use]
    pub fn raw_sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Crossfades between consecutive segments.
    #[must_use]
    pub fn transition_count(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Total runtime consumed by overlapping crossfades.
    #[must_use]
    pub fn overlap(&self, crossfade: f64) -> f64 {
        self.transition_count() as f64 * crossfade
    }

    /// Runtime of the rendered slideshow once crossfades overlap.
    #[must_use]
    pub fn displayed_duration(&self, crossfade: f64) -> f64 {
        self.raw_sum() - self.overlap(crossfade)
    }

    /// Start offset of each crossfade, in output time.
    ///
    /// Transition `i` (1-based) starts at the sum of the first `i`
    /// durations minus `i` crossfades, floored at zero.
    #[must_use]
    pub fn transition_offsets(&self, crossfade: f64) -> Vec<f64> {
        let mut elapsed = 0.0;
        self.0
            .iter()
            .take(self.transition_count())
            .enumerate()
            .map(|(i, d)| {
                elapsed += d;
                (elapsed - (i + 1) as f64 * crossfade).max(0.0)
            })
            .collect()
    }

    /// Every duration multiplied by `factor`. No clamping.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self(self.0.iter().map(|d| d * factor).collect())
    }
}

impl From<Vec<f64>> for TimingPlan {
    fn from(durations: Vec<f64>) -> Self {
        Self(durations)
    }
}

/// Weight of one voiceover line.
#[must_use]
pub fn weight(text: &str) -> f64 {
    let words = text.split_whitespace().count() as f64;
    let chars = text.trim().chars().count() as f64;
    let punctuation = text
        .chars()
        .filter(|c| matches!(c, '.' | ',' | '!' | '?' | ';' | ':'))
        .count() as f64;

    let mut weight = (0.7 * words + 0.02 * chars + 0.5 * punctuation).max(MIN_WEIGHT);

    if EMPHASIS.is_match(text) {
        weight *= EMPHASIS_BOOST;
    }
    if CALL_TO_ACTION.is_match(text) {
        weight *= CALL_TO_ACTION_BOOST;
    }

    weight
}

/// Target runtime for a set of segments, in `[25, 40]` seconds.
#[must_use]
pub fn target_duration(segments: &[Segment]) -> f64 {
    if segments.is_empty() {
        return MIN_TARGET_SECS;
    }

    let total_words: usize = segments
        .iter()
        .map(|s| s.voiceover.split_whitespace().count())
        .sum();
    let avg_words = total_words as f64 / segments.len() as f64;
    let complexity = (avg_words / FULL_COMPLEXITY_WORDS).min(1.0);

    MIN_TARGET_SECS + (MAX_TARGET_SECS - MIN_TARGET_SECS) * complexity
}

/// Allocate display durations for `segments`.
///
/// Durations are shared out by weight, then clamped and rescaled
/// repeatedly until the sum settles. When the target is unreachable
/// inside the band (one or two segments, or three with a 40s target)
/// every duration saturates at the bound instead of leaving it. Results
/// are rounded to one decimal.
///
/// Callers validate that `segments` is non-empty.
#[must_use]
pub fn allocate(segments: &[Segment]) -> TimingPlan {
    if segments.is_empty() {
        return TimingPlan::default();
    }

    let target = target_duration(segments);
    let weights: Vec<f64> = segments.iter().map(|s| weight(&s.voiceover)).collect();
    let total_weight: f64 = weights.iter().sum();

    let mut durations: Vec<f64> = weights
        .iter()
        .map(|w| (target * w / total_weight).clamp(MIN_SEGMENT_SECS, MAX_SEGMENT_SECS))
        .collect();

    for _ in 0..MAX_REBALANCE_PASSES {
        let sum: f64 = durations.iter().sum();
        if (sum - target).abs() < CONVERGENCE_EPSILON {
            break;
        }

        let factor = target / sum;
        let next: Vec<f64> = durations
            .iter()
            .map(|d| (d * factor).clamp(MIN_SEGMENT_SECS, MAX_SEGMENT_SECS))
            .collect();

        let settled = next
            .iter()
            .zip(&durations)
            .all(|(a, b)| (a - b).abs() < SETTLED_EPSILON);
        durations = next;
        if settled {
            break;
        }
    }

    TimingPlan(durations.into_iter().map(round_tenth).collect())
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(lines: &[&str]) -> Vec<Segment> {
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| Segment::new(format!("visual {i}"), *l))
            .collect()
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn weight_has_floor() {
        assert!((weight("Hi") - MIN_WEIGHT).abs() < f64::EPSILON);
    }

    #[test]
    fn weight_formula() {
        // 3 words, 14 chars, 1 punctuation mark
        let w = weight("one two three.");
        let expected = 0.7 * 3.0 + 0.02 * 14.0 + 0.5;
        assert!((w - expected).abs() < 1e-9, "{w} vs {expected}");
    }

    #[test]
    fn boosts_stack() {
        let plain = weight("this is a fairly plain sentence about gardens");
        let emphatic = weight("this is a fairly important sentence about gardens");
        assert!(emphatic > plain);

        let with_cta = weight("an important sentence, see it today");
        let without_cta = weight("an important sentence, see it later");
        assert!((with_cta / without_cta - CALL_TO_ACTION_BOOST).abs() < 1e-9);
    }

    #[test]
    fn exclamation_counts_as_emphasis() {
        let base = 0.7 * 2.0 + 0.02 * 9.0 + 0.5;
        assert!((weight("wow look!") - base * EMPHASIS_BOOST).abs() < 1e-9);
    }

    #[test]
    fn target_follows_average_words() {
        assert!((target_duration(&segs(&["a b c"])) - 28.0).abs() < 1e-9);
        let long = words(30);
        assert!((target_duration(&segs(&[&long, &long])) - MAX_TARGET_SECS).abs() < 1e-9);
    }

    #[test]
    fn six_fifteen_word_segments_fill_forty_seconds() {
        let line = words(15);
        let plan = allocate(&segs(&[&line, &line, &line, &line, &line, &line]));

        assert_eq!(plan.len(), 6);
        assert!(plan.as_slice().iter().all(|d| *d <= MAX_SEGMENT_SECS));
        assert!((plan.raw_sum() - 40.0).abs() <= 0.3, "sum {}", plan.raw_sum());
    }

    #[test]
    fn single_segment_saturates_at_cap() {
        let plan = allocate(&segs(&["five words are right here"]));
        assert_eq!(plan.as_slice(), &[MAX_SEGMENT_SECS]);
        assert_eq!(plan.transition_count(), 0);
    }

    #[test]
    fn skewed_weights_rebalance_into_band() {
        let long = words(60);
        let plan = allocate(&segs(&["Hi", "Hi", "Hi", &long]));
        let target = target_duration(&segs(&["Hi", "Hi", "Hi", &long]));

        for d in plan.as_slice() {
            assert!((MIN_SEGMENT_SECS..=MAX_SEGMENT_SECS).contains(d), "{d}");
        }
        assert!((plan.raw_sum() - target).abs() <= 0.25);
    }

    #[test]
    fn allocation_bounds_hold_for_every_count() {
        let samples = [
            "Hi",
            "Welcome to the bakery!",
            "Our sourdough is fermented for forty eight hours, giving it a deep tangy flavour.",
            "Visit us today.",
            "Important: we close early on Sundays, so plan ahead and call now to reserve.",
            "Fresh pastries every morning.",
        ];

        for n in 1..=samples.len() {
            let segments = segs(&samples[..n]);
            let plan = allocate(&segments);
            let target = target_duration(&segments);
            let reachable = target.min(n as f64 * MAX_SEGMENT_SECS);

            assert_eq!(plan.len(), n);
            for d in plan.as_slice() {
                assert!((MIN_SEGMENT_SECS..=MAX_SEGMENT_SECS).contains(d), "{n}: {d}");
            }
            assert!(
                (plan.raw_sum() - reachable).abs() <= 0.05 * n as f64 + 1e-3,
                "{n}: sum {} reachable {reachable}",
                plan.raw_sum()
            );
        }
    }

    /// Deterministic xorshift so the sweep below is reproducible.
    struct Lines(u64);

    impl Lines {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn pick(&mut self, n: u64) -> usize {
            (self.next() % n) as usize
        }

        /// A voiceover with a random length, comma density and boost mix.
        fn line(&mut self) -> (String, bool, bool) {
            const WORDS: [&str; 8] = [
                "harbour", "morning", "quiet", "bread", "river", "stone", "garden", "window",
            ];
            const LENGTHS: [usize; 8] = [1, 2, 3, 5, 8, 15, 30, 60];

            let words = LENGTHS[self.pick(8)];
            let comma_every = [0, 1, 3, 7][self.pick(4)];
            let emphasis = self.pick(3) == 0;
            let cta = self.pick(3) == 0;

            let mut parts: Vec<String> = (0..words)
                .map(|i| {
                    let word = WORDS[self.pick(8)];
                    if comma_every > 0 && i % comma_every == comma_every - 1 {
                        format!("{word},")
                    } else {
                        word.to_string()
                    }
                })
                .collect();
            if emphasis {
                parts.insert(0, "important".to_string());
            }
            if cta {
                parts.push("visit".to_string());
            }
            (format!("{}.", parts.join(" ")), emphasis, cta)
        }
    }

    #[test]
    fn generated_plans_respect_band_target_and_weight_order() {
        let mut lines = Lines(0x9E37_79B9_7F4A_7C15);

        for case in 0..600 {
            let n = case % 6 + 1;
            let generated: Vec<(String, bool, bool)> = (0..n).map(|_| lines.line()).collect();
            for (text, emphasis, cta) in &generated {
                assert_eq!(EMPHASIS.is_match(text), *emphasis, "{text}");
                assert_eq!(CALL_TO_ACTION.is_match(text), *cta, "{text}");
            }

            let voiceovers: Vec<&str> = generated.iter().map(|(t, _, _)| t.as_str()).collect();
            let segments = segs(&voiceovers);
            let plan = allocate(&segments);
            let durations = plan.as_slice();

            assert_eq!(plan.len(), n, "case {case}");
            for d in durations {
                assert!((MIN_SEGMENT_SECS..=MAX_SEGMENT_SECS).contains(d), "case {case}: {d}");
                assert!(((d * 10.0).round() - d * 10.0).abs() < 1e-9, "case {case}: {d}");
            }

            // Clamp then rescale lands on the target, or on the band edge
            // when the target is out of reach
            let reachable = target_duration(&segments)
                .clamp(n as f64 * MIN_SEGMENT_SECS, n as f64 * MAX_SEGMENT_SECS);
            assert!(
                (plan.raw_sum() - reachable).abs() <= 0.05 * n as f64 + 1e-6,
                "case {case}: sum {} reachable {reachable} plan {durations:?}",
                plan.raw_sum()
            );

            // A heavier line never gets less time than a lighter one
            let weights: Vec<f64> = voiceovers.iter().map(|v| weight(v)).collect();
            for i in 0..n {
                for j in 0..n {
                    if weights[i] > weights[j] {
                        assert!(durations[i] >= durations[j], "case {case}: {durations:?} {weights:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn allocation_is_deterministic() {
        let segments = segs(&["First line here.", "Second, longer line goes here!"]);
        assert_eq!(allocate(&segments), allocate(&segments));
    }

    #[test]
    fn crossfade_arithmetic() {
        let plan = TimingPlan::new(vec![5.0, 6.0, 7.0]);
        assert_eq!(plan.transition_count(), 2);
        assert!((plan.displayed_duration(CROSSFADE_SECS) - 16.0).abs() < 1e-9);
        assert_eq!(plan.transition_offsets(CROSSFADE_SECS), vec![4.0, 9.0]);
    }

    #[test]
    fn offsets_never_negative() {
        let plan = TimingPlan::new(vec![0.5, 0.5, 0.5]);
        assert!(plan.transition_offsets(1.0).iter().all(|o| *o >= 0.0));
    }

    #[test]
    fn plan_serializes_as_array() {
        let plan = TimingPlan::new(vec![3.5, 4.0]);
        assert_eq!(serde_json::to_string(&plan).unwrap(), "[3.5,4.0]");
    }
}
