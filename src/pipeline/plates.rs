use std::sync::mpsc;

use anyhow::Result;
use serde::Serialize;

use crate::detect::{
    retain_classes, ObjectDetector, OcrEngine, PlateDetection, PlateDetector, Track, Tracker,
    VEHICLE_CLASSES,
};
use crate::frame::{BoxCorners, Frame};
use crate::ingest::FrameSource;
use crate::plates::{PlateCache, PlateEvent};

use super::{run_source, LoopStats, PipelineControl, SnapshotSender};

/// One tracked vehicle as the sink would draw it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VehicleAnnotation {
    pub track_id: u64,
    pub bbox: BoxCorners,
    /// Cached plate text, once known.
    pub plate: Option<String>,
}

/// Immutable view of the plate pipeline after one frame.
#[derive(Clone, Debug, Serialize)]
pub struct PlateSnapshot {
    pub frame_index: u64,
    pub vehicles: Vec<VehicleAnnotation>,
    pub plates: Vec<BoxCorners>,
    /// Recognitions made on this frame.
    pub events: Vec<PlateEvent>,
    /// Tracks with a cached plate so far.
    pub known_plates: usize,
}

/// Plate pipeline stage: detector, tracker, plate detector, OCR and the cache,
/// called strictly in that order.
pub struct PlatePipeline {
    detector: Box<dyn ObjectDetector>,
    tracker: Box<dyn Tracker>,
    plate_detector: Box<dyn PlateDetector>,
    ocr: Box<dyn OcrEngine>,
    cache: PlateCache,
    vehicle_classes: Vec<u32>,
}

impl PlatePipeline {
    pub fn new(
        detector: Box<dyn ObjectDetector>,
        tracker: Box<dyn Tracker>,
        plate_detector: Box<dyn PlateDetector>,
        ocr: Box<dyn OcrEngine>,
    ) -> Self {
        Self {
            detector,
            tracker,
            plate_detector,
            ocr,
            cache: PlateCache::new(),
            vehicle_classes: VEHICLE_CLASSES.to_vec(),
        }
    }

    /// Replace the detector classes treated as vehicles.
    pub fn with_vehicle_classes(mut self, classes: Vec<u32>) -> Self {
        self.vehicle_classes = classes;
        self
    }

    pub fn cache(&self) -> &PlateCache {
        &self.cache
    }

    /// Drop every cached plate and every track, as on a pipeline restart.
    pub fn reset(&mut self) {
        self.cache.reset();
        self.tracker.reset();
        log::info!("plate pipeline: plate cache and tracks reset");
    }

    /// Feed one frame. Backend failures count as "nothing found".
    pub fn process(&mut self, frame_index: u64, frame: &Frame) -> PlateSnapshot {
        let detections = match self.detector.detect(frame) {
            Ok(detections) => retain_classes(detections, &self.vehicle_classes),
            Err(err) => {
                log::warn!("detector {} failed: {:#}", self.detector.name(), err);
                Vec::new()
            }
        };
        let tracks: Vec<Track> = match self.tracker.update(&detections) {
            Ok(tracks) => tracks,
            Err(err) => {
                log::warn!("tracker {} failed: {:#}", self.tracker.name(), err);
                Vec::new()
            }
        };
        let plates: Vec<PlateDetection> = match self.plate_detector.detect(frame) {
            Ok(plates) => plates,
            Err(err) => {
                log::warn!(
                    "plate detector {} failed: {:#}",
                    self.plate_detector.name(),
                    err
                );
                Vec::new()
            }
        };

        let events = self
            .cache
            .observe(&tracks, &plates, frame, self.ocr.as_mut());

        let vehicles = tracks
            .iter()
            .map(|track| VehicleAnnotation {
                track_id: track.track_id,
                bbox: track.bbox,
                plate: self.cache.get(track.track_id).map(|e| e.text.clone()),
            })
            .collect();
        PlateSnapshot {
            frame_index,
            vehicles,
            plates: plates.iter().map(|p| p.bbox).collect(),
            events,
            known_plates: self.cache.len(),
        }
    }

    /// Run until stopped. Snapshots go to `sink`; every recognition is also
    /// queued on `events`, which never drops. The source is released on return.
    pub fn run(
        mut self,
        mut source: Box<dyn FrameSource>,
        control: PipelineControl,
        sink: SnapshotSender<PlateSnapshot>,
        events: mpsc::Sender<PlateEvent>,
        frame_limit: Option<u64>,
    ) -> Result<LoopStats> {
        log::info!(
            "plate pipeline: detector {}, tracker {}, plates {}, ocr {}",
            self.detector.name(),
            self.tracker.name(),
            self.plate_detector.name(),
            self.ocr.name()
        );
        let mut consumer_gone = false;
        let stats = run_source(
            "plate",
            source.as_mut(),
            &control,
            frame_limit,
            |index, frame| {
                if control.take_reset_request() {
                    self.reset();
                }
                let snapshot = self.process(index, &frame);
                for event in &snapshot.events {
                    if events.send(event.clone()).is_err() && !consumer_gone {
                        log::warn!("plate event consumer is gone");
                        consumer_gone = true;
                    }
                }
                sink.publish(snapshot);
            },
        )?;
        log::info!(
            "plate pipeline: {} plates from {} OCR calls",
            self.cache.len(),
            self.cache.ocr_calls()
        );
        Ok(stats)
    }
}
