// Tap analyser - tempo and phase estimation from user taps
//
// Keeps the last few taps and fits an evenly spaced beat grid to them. The
// confidence of an estimate comes from the spread of the tempos of
// consecutive tap pairs: a tight confidence interval of their coefficient
// of variation (Vangel's approximation) means regular tapping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bitflags::bitflags;

/// Maximum number of taps the estimate is computed from
pub const MAX_TAPS: usize = 7;

/// Taps further apart than this start a new series (25 BPM)
pub const TAP_TIMEOUT: Duration = Duration::from_millis(2400);

/// Maximum deviation of a tap from the expected beat before it counts as
/// an outlier
pub const OUTLIER_THRESHOLD: Duration = Duration::from_millis(150);

/// Confidence required before outliers are rejected
const OUTLIER_MIN_CONFIDENCE: f64 = 0.5;

const DEFAULT_TEMPO: f64 = 120.0;

/// 97.5% and 2.5% quantiles of the chi-squared distribution for 1 to 5
/// degrees of freedom
const CHI2_UPPER: [f64; 5] = [5.024, 7.378, 9.348, 11.143, 12.833];
const CHI2_LOWER: [f64; 5] = [0.000982, 0.0506, 0.216, 0.484, 0.831];

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TapFlags: u8 {
        /// First tap of a new series
        const INIT = 1 << 0;
        /// The tap entered the estimate
        const VALID = 1 << 1;
        /// The previous series timed out
        const TIMEOUT = 1 << 2;
        /// The tap deviated too much and restarted the series
        const OUTLIER = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tap {
    pub time: Instant,
    pub value: f64,
    pub flags: TapFlags,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// BPM
    pub tempo: f64,
    /// Time of a beat of the fitted grid
    pub phase: Option<Instant>,
    /// 0.0 (no idea) to 1.0 (perfectly regular)
    pub confidence: f64,
}

impl Default for Estimate {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            phase: None,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TapAnalyser {
    taps: VecDeque<Tap>,
    estimate: Estimate,
}

impl TapAnalyser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tap happening now
    ///
    /// `value` scales the confidence of the resulting estimate (1.0 for a
    /// plain tap).
    pub fn tap(&mut self, value: f64) -> (Tap, Estimate) {
        self.tap_at(Instant::now(), value)
    }

    /// Records a tap at `time`
    pub fn tap_at(&mut self, time: Instant, value: f64) -> (Tap, Estimate) {
        let mut flags = TapFlags::empty();

        if let Some(last) = self.taps.back() {
            let gap = time.saturating_duration_since(last.time);

            if gap > TAP_TIMEOUT {
                flags |= TapFlags::TIMEOUT;
                self.taps.clear();
            } else if self.taps.len() >= 2 && self.estimate.confidence > OUTLIER_MIN_CONFIDENCE {
                let expected = 60.0 / self.estimate.tempo;
                if (gap.as_secs_f64() - expected).abs() > OUTLIER_THRESHOLD.as_secs_f64() {
                    flags |= TapFlags::OUTLIER;
                    self.taps.clear();
                }
            }
        }

        flags |= TapFlags::VALID;
        if self.taps.is_empty() {
            flags |= TapFlags::INIT;
        }

        let tap = Tap { time, value, flags };
        self.taps.push_back(tap);
        while self.taps.len() > MAX_TAPS {
            self.taps.pop_front();
        }

        self.estimate = self.compute_estimate();
        if flags.intersects(TapFlags::TIMEOUT | TapFlags::OUTLIER) {
            log::debug!("Tap series restarted ({:?})", flags);
        }

        (tap, self.estimate)
    }

    /// The estimate of the current tap series
    pub fn estimate(&self) -> Estimate {
        self.estimate
    }

    pub fn taps(&self) -> impl Iterator<Item = &Tap> {
        self.taps.iter()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn reset(&mut self) {
        self.taps.clear();
        self.estimate = Estimate::default();
    }

    fn compute_estimate(&self) -> Estimate {
        let (Some(first), Some(last)) = (self.taps.front(), self.taps.back()) else {
            return Estimate::default();
        };

        if self.taps.len() < 2 {
            return Estimate {
                phase: Some(first.time),
                ..Estimate::default()
            };
        }

        // tap times relative to the first tap
        let offsets: Vec<f64> = self
            .taps
            .iter()
            .map(|tap| tap.time.saturating_duration_since(first.time).as_secs_f64())
            .collect();

        let span = offsets[offsets.len() - 1];
        if span <= 0.0 {
            return Estimate {
                phase: Some(last.time),
                ..Estimate::default()
            };
        }

        let n = offsets.len() as f64;
        let tempo = 60.0 * (n - 1.0) / span;

        let mean = offsets.iter().sum::<f64>() / n;
        let phase = first.time + Duration::from_secs_f64(mean + span / 2.0);

        let pair_tempos: Vec<f64> = offsets
            .windows(2)
            .filter(|pair| pair[1] > pair[0])
            .map(|pair| 60.0 / (pair[1] - pair[0]))
            .collect();

        let confidence = confidence(&pair_tempos) * last.value.clamp(0.0, 1.0);

        Estimate {
            tempo,
            phase: Some(phase),
            confidence,
        }
    }
}

/// Confidence of a series of tempo samples
fn confidence(samples: &[f64]) -> f64 {
    let m = samples.len();
    if m < 2 {
        return 0.0;
    }
    let dof = (m - 1).min(CHI2_UPPER.len());

    let mean = samples.iter().sum::<f64>() / m as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (m - 1) as f64;
    let cv = variance.sqrt() / mean;

    match cv_interval(cv, dof) {
        Some((lower, upper)) => {
            let half_width = (upper - lower) / 2.0;
            (1.0 - (2.0 * half_width).tanh()).clamp(0.0, 1.0)
        }
        None => 0.0,
    }
}

/// 95% confidence interval of a coefficient of variation (Vangel)
///
/// Returns `None` where the approximation breaks down.
fn cv_interval(cv: f64, dof: usize) -> Option<(f64, f64)> {
    let nu = dof as f64;
    let u1 = CHI2_UPPER[dof - 1];
    let u2 = CHI2_LOWER[dof - 1];
    let c2 = cv * cv;

    let d1 = ((u1 + 2.0) / (nu + 1.0) - 1.0) * c2 + u1 / nu;
    let d2 = ((u2 + 2.0) / (nu + 1.0) - 1.0) * c2 + u2 / nu;
    if d1 <= 0.0 || d2 <= 0.0 {
        return None;
    }
    Some((cv / d1.sqrt(), cv / d2.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn tap_series(analyser: &mut TapAnalyser, start: Instant, times: &[u64]) -> Estimate {
        let mut estimate = Estimate::default();
        for &t in times {
            estimate = analyser.tap_at(start + ms(t), 1.0).1;
        }
        estimate
    }

    #[test]
    fn test_single_tap_default() {
        let mut analyser = TapAnalyser::new();
        let now = Instant::now();
        let (tap, estimate) = analyser.tap_at(now, 1.0);

        assert_eq!(tap.flags, TapFlags::VALID | TapFlags::INIT);
        assert_eq!(estimate.tempo, 120.0);
        assert_eq!(estimate.confidence, 0.0);
        assert_eq!(estimate.phase, Some(now));
    }

    #[test]
    fn test_two_taps_have_no_confidence() {
        let mut analyser = TapAnalyser::new();
        let estimate = tap_series(&mut analyser, Instant::now(), &[0, 600]);
        assert!((estimate.tempo - 100.0).abs() < EPSILON);
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn test_regular_taps() {
        let mut analyser = TapAnalyser::new();
        let start = Instant::now();
        let estimate = tap_series(&mut analyser, start, &[0, 500, 1000, 1500, 2000]);

        assert!((estimate.tempo - 120.0).abs() < EPSILON);
        assert!((estimate.confidence - 1.0).abs() < EPSILON);
        // mean 1.0s + half span 1.0s: the last tap
        assert_eq!(estimate.phase, Some(start + ms(2000)));
    }

    #[test]
    fn test_jitter_lowers_confidence() {
        let start = Instant::now();

        let mut steady = TapAnalyser::new();
        let steady = tap_series(&mut steady, start, &[0, 500, 1005, 1500, 2002, 2500, 3000]);

        let mut sloppy = TapAnalyser::new();
        let sloppy = tap_series(&mut sloppy, start, &[0, 450, 1020, 1480, 2060, 2470, 3000]);

        assert!(steady.confidence > sloppy.confidence);
        assert!(steady.confidence > 0.5 && steady.confidence < 1.0);
        assert!(sloppy.confidence >= 0.0);
    }

    #[test]
    fn test_timeout_resets_series() {
        let mut analyser = TapAnalyser::new();
        let start = Instant::now();
        tap_series(&mut analyser, start, &[0, 500, 1000]);

        let (tap, estimate) = analyser.tap_at(start + ms(3500), 1.0);
        assert_eq!(
            tap.flags,
            TapFlags::TIMEOUT | TapFlags::VALID | TapFlags::INIT
        );
        assert_eq!(analyser.len(), 1);
        assert_eq!(estimate.tempo, 120.0);
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn test_outlier_resets_series() {
        let mut analyser = TapAnalyser::new();
        let start = Instant::now();
        let estimate = tap_series(&mut analyser, start, &[0, 500, 1000, 1500]);
        assert!(estimate.confidence > OUTLIER_MIN_CONFIDENCE);

        let (tap, estimate) = analyser.tap_at(start + ms(1700), 1.0);
        assert_eq!(
            tap.flags,
            TapFlags::OUTLIER | TapFlags::VALID | TapFlags::INIT
        );
        assert_eq!(analyser.len(), 1);
        assert_eq!(estimate.tempo, 120.0);
    }

    #[test]
    fn test_no_outlier_check_without_confidence() {
        let mut analyser = TapAnalyser::new();
        let start = Instant::now();
        tap_series(&mut analyser, start, &[0, 500]);

        let (tap, _) = analyser.tap_at(start + ms(700), 1.0);
        assert_eq!(tap.flags, TapFlags::VALID);
        assert_eq!(analyser.len(), 3);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut analyser = TapAnalyser::new();
        let start = Instant::now();
        let times: Vec<u64> = (0..12).map(|i| i * 400).collect();
        let estimate = tap_series(&mut analyser, start, &times);

        assert_eq!(analyser.len(), MAX_TAPS);
        assert!((estimate.tempo - 150.0).abs() < EPSILON);
    }

    #[test]
    fn test_value_scales_confidence() {
        let mut analyser = TapAnalyser::new();
        let start = Instant::now();
        tap_series(&mut analyser, start, &[0, 500, 1000]);
        let (_, estimate) = analyser.tap_at(start + ms(1500), 0.5);
        assert!((estimate.confidence - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_cv_interval_contains_cv() {
        for dof in 1..=5 {
            let (lower, upper) = cv_interval(0.01, dof).unwrap();
            assert!(lower < 0.01 && 0.01 < upper);
        }
        assert_eq!(cv_interval(0.0, 3), Some((0.0, 0.0)));
        // the lower quantile of one degree of freedom is tiny, so the bound is wide
        let (lower, upper) = cv_interval(0.1, 1).unwrap();
        assert!(lower < 0.1 && upper > 3.0);
        // a large spread leaves no upper bound
        assert_eq!(cv_interval(1.0, 5), None);
    }

    #[test]
    fn test_reset() {
        let mut analyser = TapAnalyser::new();
        tap_series(&mut analyser, Instant::now(), &[0, 500, 1000]);
        analyser.reset();
        assert!(analyser.is_empty());
        assert_eq!(analyser.estimate(), Estimate::default());
    }
}
