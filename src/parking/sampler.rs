//! Spot occupancy sampler.
//!
//! Re-evaluates parking spots only at sampling boundaries (every `interval`
//! frames) and, after the first cycle, only the spots whose mean intensity moved
//! noticeably since the previous boundary. Everything else keeps its status.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::detect::OccupancyClassifier;
use crate::frame::Frame;

use super::layout::{spot_label, SpotLayout};

/// Default number of frames between sampling boundaries.
pub const DEFAULT_SAMPLE_INTERVAL: u64 = 30;

/// Default fraction of the cycle's largest motion score a spot must exceed to
/// be re-classified.
pub const DEFAULT_DIFF_RATIO: f64 = 0.4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotStatus {
    /// Not classified yet.
    #[default]
    Unknown,
    Empty,
    Occupied,
}

// ----------------------------------------------------------------------------
// Sampling clock
// ----------------------------------------------------------------------------

/// Monotonic frame counter with a fixed sampling interval.
///
/// The counter is never reset by source rewinds, so boundaries stay evenly spaced
/// across loop playback.
#[derive(Clone, Debug)]
pub struct SamplingClock {
    interval: u64,
    next_index: u64,
}

impl SamplingClock {
    pub fn new(interval: u64) -> Result<Self> {
        if interval == 0 {
            bail!("sampling interval must be greater than zero");
        }
        Ok(Self {
            interval,
            next_index: 0,
        })
    }

    /// Index to use for the next frame.
    pub fn tick(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn is_boundary(&self, frame_index: u64) -> bool {
        frame_index % self.interval == 0
    }

    /// Frames counted so far.
    pub fn frames(&self) -> u64 {
        self.next_index
    }
}

// ----------------------------------------------------------------------------
// Candidate selection
// ----------------------------------------------------------------------------

/// Spots whose motion score is more than `ratio` of the largest score.
///
/// When nothing moved at all (`max == 0`) no spot is a candidate.
pub fn select_candidates(diffs: &[f64], ratio: f64) -> Vec<usize> {
    let max = diffs.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return Vec::new();
    }
    diffs
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d / max > ratio)
        .map(|(i, _)| i)
        .collect()
}

// ----------------------------------------------------------------------------
// Sampler
// ----------------------------------------------------------------------------

/// Authoritative per-spot status for one parking pipeline.
pub struct SpotSampler {
    layout: SpotLayout,
    clock: SamplingClock,
    diff_ratio: f64,
    statuses: Vec<SpotStatus>,
    diffs: Vec<f64>,
    previous_frame: Option<Frame>,
    classifier_calls: u64,
}

/// What one `observe` call did.
#[derive(Clone, Debug)]
pub struct SampleOutcome {
    /// True when the frame was a sampling boundary.
    pub sampled: bool,
    /// Spots chosen for re-classification this cycle.
    pub candidates: Vec<usize>,
    pub summary: OccupancySummary,
}

impl SpotSampler {
    pub fn new(layout: SpotLayout, interval: u64, diff_ratio: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&diff_ratio) {
            bail!("diff ratio must be in [0, 1), got {}", diff_ratio);
        }
        let clock = SamplingClock::new(interval)?;
        let count = layout.len();
        Ok(Self {
            layout,
            clock,
            diff_ratio,
            statuses: vec![SpotStatus::Unknown; count],
            diffs: vec![0.0; count],
            previous_frame: None,
            classifier_calls: 0,
        })
    }

    pub fn layout(&self) -> &SpotLayout {
        &self.layout
    }

    pub fn statuses(&self) -> &[SpotStatus] {
        &self.statuses
    }

    pub fn diffs(&self) -> &[f64] {
        &self.diffs
    }

    pub fn clock(&self) -> &SamplingClock {
        &self.clock
    }

    pub fn classifier_calls(&self) -> u64 {
        self.classifier_calls
    }

    /// Count `frame` on the sampler's own clock and observe it.
    pub fn observe_next(
        &mut self,
        frame: &Frame,
        classifier: &mut dyn OccupancyClassifier,
    ) -> SampleOutcome {
        let index = self.clock.tick();
        self.observe(frame, index, classifier)
    }

    /// Observe frame number `frame_index`.
    ///
    /// Off-boundary frames change nothing. At a boundary the motion scores are
    /// refreshed, candidates re-classified and `frame` kept as the new reference.
    pub fn observe(
        &mut self,
        frame: &Frame,
        frame_index: u64,
        classifier: &mut dyn OccupancyClassifier,
    ) -> SampleOutcome {
        if !self.clock.is_boundary(frame_index) {
            return SampleOutcome {
                sampled: false,
                candidates: Vec::new(),
                summary: self.summary(),
            };
        }

        let candidates = match &self.previous_frame {
            None => (0..self.layout.len()).collect(),
            Some(previous) => {
                for spot in self.layout.spots() {
                    let current = frame.region_mean(&spot.roi);
                    let before = previous.region_mean(&spot.roi);
                    // Out of bounds in either frame: keep the last score.
                    if let (Some(current), Some(before)) = (current, before) {
                        self.diffs[spot.index] = (current - before).abs();
                    }
                }
                select_candidates(&self.diffs, self.diff_ratio)
            }
        };

        for &index in &candidates {
            let spot = self.layout.spots()[index];
            let Some(crop) = frame.crop(&spot.roi) else {
                continue;
            };
            self.classifier_calls += 1;
            match classifier.classify(&crop) {
                Ok(occupied) => {
                    self.statuses[index] = if occupied {
                        SpotStatus::Occupied
                    } else {
                        SpotStatus::Empty
                    };
                }
                Err(err) => {
                    log::warn!(
                        "classifier {} failed on spot {}: {:#}",
                        classifier.name(),
                        spot.label(),
                        err
                    );
                }
            }
        }

        self.previous_frame = Some(frame.clone());

        log::debug!(
            "sampling boundary at frame {}: {} candidates",
            frame_index,
            candidates.len()
        );
        SampleOutcome {
            sampled: true,
            candidates,
            summary: self.summary(),
        }
    }

    pub fn summary(&self) -> OccupancySummary {
        OccupancySummary::from_statuses(&self.statuses)
    }

    /// Back to the startup state: every spot unknown, no reference frame.
    /// The clock keeps counting.
    pub fn reset(&mut self) {
        self.statuses.fill(SpotStatus::Unknown);
        self.diffs.fill(0.0);
        self.previous_frame = None;
    }
}

// ----------------------------------------------------------------------------
// Summary
// ----------------------------------------------------------------------------

/// Derived view of the status vector handed to consumers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OccupancySummary {
    pub statuses: Vec<SpotStatus>,
    /// Spots currently `Empty`.
    pub available: usize,
    pub total: usize,
    /// Indices of `Empty` spots, ascending.
    pub free_spots: Vec<usize>,
}

impl OccupancySummary {
    pub fn from_statuses(statuses: &[SpotStatus]) -> Self {
        let free_spots: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == SpotStatus::Empty)
            .map(|(i, _)| i)
            .collect();
        Self {
            statuses: statuses.to_vec(),
            available: free_spots.len(),
            total: statuses.len(),
            free_spots,
        }
    }

    pub fn free_labels(&self) -> Vec<String> {
        self.free_spots.iter().map(|&i| spot_label(i)).collect()
    }

    /// Percentage of spots not currently free. Zero for an empty lot.
    pub fn occupancy_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.total - self.available) as f64 / self.total as f64 * 100.0
    }

    /// Free spot labels, five per line, or `FULL` when none are free.
    pub fn format_free_list(&self) -> String {
        if self.free_spots.is_empty() {
            return "FULL".to_string();
        }
        self.free_labels()
            .chunks(5)
            .map(|row| {
                row.iter()
                    .map(|label| format!("{:<8}", label))
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Roi;

    /// Classifier that answers from a script and counts calls.
    struct Scripted {
        occupied: bool,
        calls: usize,
        fail: bool,
    }

    impl Scripted {
        fn answering(occupied: bool) -> Self {
            Self {
                occupied,
                calls: 0,
                fail: false,
            }
        }
    }

    impl OccupancyClassifier for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn classify(&mut self, _spot: &Frame) -> Result<bool> {
            self.calls += 1;
            if self.fail {
                bail!("scripted failure");
            }
            Ok(self.occupied)
        }
    }

    fn row_layout(count: u32) -> SpotLayout {
        SpotLayout::from_rois((0..count).map(|i| Roi::new(i * 10, 0, 10, 10)).collect()).unwrap()
    }

    #[test]
    fn candidates_exceed_ratio_of_largest_motion() {
        assert_eq!(select_candidates(&[10.0, 4.0, 0.0, 20.0], 0.4), vec![0, 3]);
    }

    #[test]
    fn equal_motion_selects_every_spot() {
        assert_eq!(select_candidates(&[5.0; 4], 0.4), vec![0, 1, 2, 3]);
    }

    #[test]
    fn no_motion_selects_nothing() {
        assert!(select_candidates(&[0.0, 0.0, 0.0], 0.4).is_empty());
        assert!(select_candidates(&[], 0.4).is_empty());
    }

    #[test]
    fn first_boundary_classifies_every_spot() {
        let mut sampler = SpotSampler::new(row_layout(5), 30, 0.4).unwrap();
        let mut classifier = Scripted::answering(true);
        let frame = Frame::filled(50, 10, [70, 70, 70]);

        let outcome = sampler.observe(&frame, 0, &mut classifier);
        assert!(outcome.sampled);
        assert_eq!(outcome.candidates, vec![0, 1, 2, 3, 4]);
        assert_eq!(classifier.calls, 5);
        assert_eq!(sampler.statuses(), &[SpotStatus::Occupied; 5]);
        assert_eq!(outcome.summary.total, 5);
        assert_eq!(outcome.summary.available, 0);
    }

    #[test]
    fn off_boundary_frames_change_nothing() {
        let mut sampler = SpotSampler::new(row_layout(3), 30, 0.4).unwrap();
        let mut classifier = Scripted::answering(false);
        let frame = Frame::filled(30, 10, [70, 70, 70]);

        for index in 1..30 {
            let outcome = sampler.observe(&frame, index, &mut classifier);
            assert!(!outcome.sampled);
        }
        assert_eq!(classifier.calls, 0);
        assert_eq!(sampler.statuses(), &[SpotStatus::Unknown; 3]);
    }

    #[test]
    fn only_moving_spots_are_reclassified() {
        let mut sampler = SpotSampler::new(row_layout(4), 30, 0.4).unwrap();
        let mut classifier = Scripted::answering(false);
        let mut frame = Frame::filled(40, 10, [70, 70, 70]);
        sampler.observe(&frame, 0, &mut classifier);
        assert_eq!(classifier.calls, 4);

        // Spot 3 changes a lot, spot 1 a little.
        frame.fill_rect(&Roi::new(30, 0, 10, 10), [200, 200, 200]);
        frame.fill_rect(&Roi::new(10, 0, 10, 1), [80, 80, 80]);
        let mut classifier = Scripted::answering(true);
        let outcome = sampler.observe(&frame, 30, &mut classifier);

        assert_eq!(outcome.candidates, vec![3]);
        assert_eq!(classifier.calls, 1);
        assert_eq!(
            sampler.statuses(),
            &[
                SpotStatus::Empty,
                SpotStatus::Empty,
                SpotStatus::Empty,
                SpotStatus::Occupied
            ]
        );
        assert_eq!(outcome.summary.free_spots, vec![0, 1, 2]);
    }

    #[test]
    fn out_of_bounds_spot_stays_unknown() {
        let layout = SpotLayout::from_rois(vec![Roi::new(0, 0, 10, 10), Roi::new(35, 0, 10, 10)])
            .unwrap();
        let mut sampler = SpotSampler::new(layout, 1, 0.4).unwrap();
        let mut classifier = Scripted::answering(false);

        for index in 0..3 {
            let shade = 60 + index as u8 * 40;
            let frame = Frame::filled(40, 10, [shade, shade, shade]);
            let outcome = sampler.observe(&frame, index, &mut classifier);
            assert_eq!(outcome.summary.statuses.len(), 2);
        }
        assert_eq!(sampler.statuses()[0], SpotStatus::Empty);
        assert_eq!(sampler.statuses()[1], SpotStatus::Unknown);
        assert_eq!(sampler.diffs()[1], 0.0);
    }

    #[test]
    fn classifier_failure_keeps_previous_status() {
        let mut sampler = SpotSampler::new(row_layout(2), 1, 0.4).unwrap();
        let mut classifier = Scripted::answering(true);
        sampler.observe(&Frame::filled(20, 10, [10, 10, 10]), 0, &mut classifier);

        classifier.fail = true;
        sampler.observe(&Frame::filled(20, 10, [90, 90, 90]), 1, &mut classifier);
        assert_eq!(sampler.statuses(), &[SpotStatus::Occupied; 2]);
        assert_eq!(sampler.classifier_calls(), 4);
    }

    #[test]
    fn reference_frame_is_an_independent_copy() {
        let mut sampler = SpotSampler::new(row_layout(1), 1, 0.4).unwrap();
        let mut classifier = Scripted::answering(false);
        let mut frame = Frame::filled(10, 10, [10, 10, 10]);
        sampler.observe(&frame, 0, &mut classifier);

        // Mutating the caller's frame must not leak into the reference.
        frame.fill_rect(&Roi::new(0, 0, 10, 10), [110, 110, 110]);
        sampler.observe(&frame, 1, &mut classifier);
        assert_eq!(sampler.diffs()[0], 100.0);
    }

    #[test]
    fn reset_forgets_statuses() {
        let mut sampler = SpotSampler::new(row_layout(2), 1, 0.4).unwrap();
        let mut classifier = Scripted::answering(true);
        sampler.observe_next(&Frame::filled(20, 10, [0, 0, 0]), &mut classifier);
        sampler.reset();
        assert_eq!(sampler.statuses(), &[SpotStatus::Unknown; 2]);
        assert_eq!(sampler.clock().frames(), 1);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(SpotSampler::new(row_layout(1), 0, 0.4).is_err());
        assert!(SpotSampler::new(row_layout(1), 30, 1.5).is_err());
    }

    #[test]
    fn summary_formats_free_spots() {
        use SpotStatus::*;
        let summary = OccupancySummary::from_statuses(&[
            Empty, Occupied, Empty, Empty, Unknown, Empty, Empty, Empty,
        ]);
        assert_eq!(summary.available, 6);
        assert_eq!(summary.total, 8);
        assert!((summary.occupancy_rate() - 25.0).abs() < 1e-9);
        assert_eq!(
            summary.format_free_list(),
            "P1      P3      P4      P6      P7\nP8"
        );

        let full = OccupancySummary::from_statuses(&[Occupied, Occupied]);
        assert_eq!(full.format_free_list(), "FULL");
        assert_eq!(full.occupancy_rate(), 100.0);
        assert_eq!(OccupancySummary::default().occupancy_rate(), 0.0);
    }
}
