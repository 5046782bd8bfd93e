use anyhow::Result;
use serde::Serialize;

use crate::detect::OccupancyClassifier;
use crate::frame::{Frame, Roi};
use crate::ingest::FrameSource;
use crate::parking::{OccupancySummary, SpotSampler, SpotStatus};

use super::{run_source, LoopStats, PipelineControl, SnapshotSender};

/// One spot as the sink would draw it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpotAnnotation {
    pub label: String,
    pub roi: Roi,
    pub status: SpotStatus,
}

/// Immutable view of the parking pipeline after one frame.
#[derive(Clone, Debug, Serialize)]
pub struct ParkingSnapshot {
    pub frame_index: u64,
    /// True when this frame was a sampling boundary.
    pub sampled: bool,
    pub summary: OccupancySummary,
    pub annotations: Vec<SpotAnnotation>,
}

/// Parking pipeline stage: the sampler and its classifier.
pub struct ParkingPipeline {
    sampler: SpotSampler,
    classifier: Box<dyn OccupancyClassifier>,
}

impl ParkingPipeline {
    pub fn new(sampler: SpotSampler, classifier: Box<dyn OccupancyClassifier>) -> Self {
        Self {
            sampler,
            classifier,
        }
    }

    pub fn sampler(&self) -> &SpotSampler {
        &self.sampler
    }

    /// Forget every status and the reference frame. The next frame that falls
    /// on a boundary classifies every spot again.
    pub fn reset(&mut self) {
        self.sampler.reset();
        log::info!("parking pipeline: spot states reset");
    }

    /// Feed one frame and describe the result.
    pub fn process(&mut self, frame_index: u64, frame: &Frame) -> ParkingSnapshot {
        let outcome = self
            .sampler
            .observe(frame, frame_index, self.classifier.as_mut());
        if outcome.sampled {
            log::debug!(
                "parking: {}/{} free at frame {} ({} re-classified)",
                outcome.summary.available,
                outcome.summary.total,
                frame_index,
                outcome.candidates.len()
            );
        }
        let annotations = self
            .sampler
            .layout()
            .spots()
            .iter()
            .zip(self.sampler.statuses())
            .map(|(spot, status)| SpotAnnotation {
                label: spot.label(),
                roi: spot.roi,
                status: *status,
            })
            .collect();
        ParkingSnapshot {
            frame_index,
            sampled: outcome.sampled,
            summary: outcome.summary,
            annotations,
        }
    }

    /// Run until stopped, publishing a snapshot per frame. The source is
    /// released on return.
    pub fn run(
        mut self,
        mut source: Box<dyn FrameSource>,
        control: PipelineControl,
        sink: SnapshotSender<ParkingSnapshot>,
        frame_limit: Option<u64>,
    ) -> Result<LoopStats> {
        log::info!(
            "parking pipeline: {} spots, classifier {}, every {} frames",
            self.sampler.layout().len(),
            self.classifier.name(),
            self.sampler.clock().interval()
        );
        run_source(
            "parking",
            source.as_mut(),
            &control,
            frame_limit,
            |index, frame| {
                if control.take_reset_request() {
                    self.reset();
                }
                sink.publish(self.process(index, &frame));
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::IntensityClassifier;
    use crate::ingest::synthetic::{parking_bay_occupied, parking_grid};
    use crate::ingest::{open_source, SourceSettings};
    use crate::parking::SpotLayout;
    use crate::pipeline::latest;

    fn pipeline(interval: u64) -> Result<ParkingPipeline> {
        let layout = SpotLayout::from_rois(parking_grid(320, 240))?;
        let sampler = SpotSampler::new(layout, interval, 0.4)?;
        Ok(ParkingPipeline::new(
            sampler,
            Box::new(IntensityClassifier::default()),
        ))
    }

    #[test]
    fn off_boundary_frames_keep_statuses() -> Result<()> {
        let mut pipeline = pipeline(30)?;
        let frame = Frame::filled(320, 240, [80, 80, 80]);
        let first = pipeline.process(0, &frame);
        assert!(first.sampled);
        assert_eq!(first.annotations.len(), 10);
        assert!(first
            .annotations
            .iter()
            .all(|a| a.status == SpotStatus::Empty));

        let second = pipeline.process(1, &frame);
        assert!(!second.sampled);
        assert_eq!(second.summary, first.summary);
        assert_eq!(pipeline.sampler().classifier_calls(), 10);
        Ok(())
    }

    #[test]
    fn reset_reclassifies_every_spot_at_the_next_boundary() -> Result<()> {
        let mut pipeline = pipeline(30)?;
        let frame = Frame::filled(320, 240, [80, 80, 80]);
        pipeline.process(0, &frame);
        pipeline.reset();

        let between = pipeline.process(1, &frame);
        assert!(between
            .annotations
            .iter()
            .all(|a| a.status == SpotStatus::Unknown));
        assert_eq!(between.summary.available, 0);

        // No reference frame after a reset, so nothing is left to diff against.
        let boundary = pipeline.process(30, &frame);
        assert!(boundary.sampled);
        assert_eq!(boundary.summary.available, 10);
        assert_eq!(pipeline.sampler().classifier_calls(), 20);
        Ok(())
    }

    #[test]
    fn labels_follow_layout_order() -> Result<()> {
        let mut pipeline = pipeline(5)?;
        let snapshot = pipeline.process(0, &Frame::filled(320, 240, [0, 0, 0]));
        let labels: Vec<&str> = snapshot.annotations.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels[0], "P1");
        assert_eq!(labels[9], "P10");
        Ok(())
    }

    #[test]
    fn synthetic_lot_reports_occupancy() -> Result<()> {
        let pipeline = pipeline(10)?;
        let (tx, rx) = latest();
        let source = open_source(&SourceSettings {
            location: "stub://parking".to_string(),
            target_fps: 0,
            width: 320,
            height: 240,
            synthetic_frames: 50,
            ..SourceSettings::default()
        })?;
        let stats = pipeline.run(source, PipelineControl::new(), tx, Some(11))?;
        assert_eq!(stats.frames, 11);

        let snapshot = rx.try_take().expect("a snapshot was published");
        assert_eq!(snapshot.frame_index, 10);
        assert!(snapshot.sampled);
        let expected: Vec<SpotStatus> = (0..10)
            .map(|i| {
                if parking_bay_occupied(i, 10) {
                    SpotStatus::Occupied
                } else {
                    SpotStatus::Empty
                }
            })
            .collect();
        assert_eq!(snapshot.summary.statuses, expected);
        assert_eq!(rx.stats().published, 11);
        assert_eq!(rx.stats().dropped, 10);
        Ok(())
    }
}
