//! Plate identity cache.
//!
//! Maps each vehicle track to at most one recognized plate. OCR runs only for
//! tracks that have no entry yet, and an entry is never overwritten or removed,
//! so each track is read at most once and its text never changes.
//!
//! Track identifiers come from the tracker. If the tracker hands an old
//! identifier to a different vehicle after a long absence, that vehicle inherits
//! the old text. The cache is only as unique as the identifiers it is given.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::Regex;
use serde::Serialize;

use crate::detect::{OcrEngine, OcrReading, PlateDetection, Track};
use crate::frame::{Frame, PLATE_BINARY_THRESHOLD};

use super::association::associate;

/// Recognized plate for one track. Written once.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlateCacheEntry {
    pub text: String,
    pub confidence: f32,
    pub recognized_at: SystemTime,
}

/// Emitted exactly once per track, when its plate is first recognized.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlateEvent {
    pub track_id: u64,
    pub text: String,
    pub confidence: f32,
}

#[derive(Default)]
pub struct PlateCache {
    entries: HashMap<u64, PlateCacheEntry>,
    ocr_calls: u64,
}

impl PlateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, track_id: u64) -> Option<&PlateCacheEntry> {
        self.entries.get(&track_id)
    }

    pub fn contains(&self, track_id: u64) -> bool {
        self.entries.contains_key(&track_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of OCR invocations so far.
    pub fn ocr_calls(&self) -> u64 {
        self.ocr_calls
    }

    /// Known plates as `(track_id, text)`, ordered by track id.
    pub fn plates(&self) -> Vec<(u64, String)> {
        let mut plates: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.text.clone()))
            .collect();
        plates.sort_by_key(|(id, _)| *id);
        plates
    }

    /// Fuse one frame's tracks and plate detections into the cache.
    ///
    /// Plates outside every track are ignored. Plates of tracks that already
    /// have an entry cost nothing. Otherwise the plate is cropped, binarized and
    /// read; the first non-empty reading becomes the track's entry and is
    /// returned as an event.
    pub fn observe(
        &mut self,
        tracks: &[Track],
        plates: &[PlateDetection],
        frame: &Frame,
        ocr: &mut dyn OcrEngine,
    ) -> Vec<PlateEvent> {
        let mut events = Vec::new();
        for plate in plates {
            let Some(track) = associate(tracks, &plate.bbox) else {
                continue;
            };
            if self.entries.contains_key(&track.track_id) {
                continue;
            }
            let Some(roi) = frame.clip(&plate.bbox) else {
                continue;
            };
            let Some(crop) = frame.crop(&roi) else {
                continue;
            };
            let binary = crop.to_gray().binarize_inverse(PLATE_BINARY_THRESHOLD);

            self.ocr_calls += 1;
            let reading = match ocr.read(&binary) {
                Ok(reading) => reading,
                Err(err) => {
                    log::warn!(
                        "OCR {} failed for track {}: {:#}",
                        ocr.name(),
                        track.track_id,
                        err
                    );
                    None
                }
            };
            let Some(OcrReading { text, confidence }) = reading else {
                continue;
            };
            let Some(text) = normalize_plate_text(&text) else {
                continue;
            };

            log::info!("track {} plate {} ({:.2})", track.track_id, text, confidence);
            self.entries.insert(
                track.track_id,
                PlateCacheEntry {
                    text: text.clone(),
                    confidence,
                    recognized_at: SystemTime::now(),
                },
            );
            events.push(PlateEvent {
                track_id: track.track_id,
                text,
                confidence,
            });
        }
        events
    }

    /// Drop every entry. Only for an explicit pipeline restart.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

/// Upper-case and keep only ASCII letters and digits. `None` if nothing is left.
pub fn normalize_plate_text(raw: &str) -> Option<String> {
    static NON_PLATE: OnceLock<Regex> = OnceLock::new();
    let pattern = NON_PLATE.get_or_init(|| Regex::new("[^A-Z0-9]+").expect("valid pattern"));
    let text = pattern.replace_all(&raw.to_uppercase(), "").into_owned();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BoxCorners, GrayImage, Roi};
    use anyhow::{bail, Result};

    /// OCR stub answering from a queue and counting calls.
    struct ScriptedOcr {
        answers: Vec<Result<Option<OcrReading>>>,
        calls: usize,
    }

    impl ScriptedOcr {
        fn new(answers: Vec<Result<Option<OcrReading>>>) -> Self {
            Self { answers, calls: 0 }
        }
    }

    impl OcrEngine for ScriptedOcr {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn read(&mut self, _image: &GrayImage) -> Result<Option<OcrReading>> {
            self.calls += 1;
            if self.answers.is_empty() {
                return Ok(None);
            }
            self.answers.remove(0)
        }
    }

    fn reading(text: &str, confidence: f32) -> Result<Option<OcrReading>> {
        Ok(Some(OcrReading {
            text: text.to_string(),
            confidence,
        }))
    }

    fn track(track_id: u64, x1: f32, y1: f32, x2: f32, y2: f32) -> Track {
        Track {
            bbox: BoxCorners::new(x1, y1, x2, y2),
            track_id,
        }
    }

    fn plate(x1: f32, y1: f32, x2: f32, y2: f32) -> PlateDetection {
        PlateDetection {
            bbox: BoxCorners::new(x1, y1, x2, y2),
            score: 0.8,
        }
    }

    fn scene() -> Frame {
        let mut frame = Frame::filled(200, 120, [90, 90, 90]);
        frame.fill_rect(&Roi::new(40, 60, 60, 20), [240, 240, 240]);
        frame
    }

    #[test]
    fn first_recognition_emits_once() {
        let mut cache = PlateCache::new();
        let mut ocr = ScriptedOcr::new(vec![reading("B1234XYZ", 0.92), reading("ZZZ999", 0.99)]);
        let tracks = [track(42, 10.0, 10.0, 150.0, 100.0)];
        let frame = scene();

        let events = cache.observe(&tracks, &[plate(40.0, 60.0, 100.0, 80.0)], &frame, &mut ocr);
        assert_eq!(
            events,
            vec![PlateEvent {
                track_id: 42,
                text: "B1234XYZ".to_string(),
                confidence: 0.92,
            }]
        );

        // Same track, new plate detection: no OCR, no event, text unchanged.
        let events = cache.observe(&tracks, &[plate(42.0, 61.0, 98.0, 79.0)], &frame, &mut ocr);
        assert!(events.is_empty());
        assert_eq!(ocr.calls, 1);
        assert_eq!(cache.ocr_calls(), 1);
        assert_eq!(cache.get(42).map(|e| e.text.as_str()), Some("B1234XYZ"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reset_lets_a_track_be_read_again() {
        let mut cache = PlateCache::new();
        let mut ocr = ScriptedOcr::new(vec![reading("B1234XYZ", 0.92), reading("C777", 0.8)]);
        let tracks = [track(42, 10.0, 10.0, 150.0, 100.0)];
        let plates = [plate(40.0, 60.0, 100.0, 80.0)];
        let frame = scene();

        assert_eq!(cache.observe(&tracks, &plates, &frame, &mut ocr).len(), 1);
        cache.reset();
        assert!(cache.is_empty());
        assert!(!cache.contains(42));

        let events = cache.observe(&tracks, &plates, &frame, &mut ocr);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "C777");
        assert_eq!(ocr.calls, 2);
    }

    #[test]
    fn unassociated_plates_are_ignored() {
        let mut cache = PlateCache::new();
        let mut ocr = ScriptedOcr::new(vec![reading("B1234XYZ", 0.9)]);
        let tracks = [track(1, 0.0, 0.0, 50.0, 50.0)];
        let events = cache.observe(&tracks, &[plate(40.0, 60.0, 100.0, 80.0)], &scene(), &mut ocr);
        assert!(events.is_empty());
        assert_eq!(ocr.calls, 0);
    }

    #[test]
    fn empty_crop_is_skipped_without_ocr() {
        let mut cache = PlateCache::new();
        let mut ocr = ScriptedOcr::new(vec![reading("B1234XYZ", 0.9)]);
        // Track and plate entirely right of the frame.
        let tracks = [track(5, 250.0, 0.0, 400.0, 100.0)];
        let events = cache.observe(&tracks, &[plate(260.0, 10.0, 300.0, 20.0)], &scene(), &mut ocr);
        assert!(events.is_empty());
        assert_eq!(ocr.calls, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_or_blank_reads_allow_a_retry() {
        let mut cache = PlateCache::new();
        let mut ocr = ScriptedOcr::new(vec![
            Ok(None),
            Err(anyhow::anyhow!("engine crashed")),
            reading(" -- ", 0.5),
            reading("ab 12-c", 0.7),
        ]);
        let tracks = [track(7, 10.0, 10.0, 150.0, 100.0)];
        let plates = [plate(40.0, 60.0, 100.0, 80.0)];
        let frame = scene();

        for _ in 0..3 {
            assert!(cache.observe(&tracks, &plates, &frame, &mut ocr).is_empty());
        }
        let events = cache.observe(&tracks, &plates, &frame, &mut ocr);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "AB12C");
        assert_eq!(ocr.calls, 4);
    }

    #[test]
    fn plate_goes_to_the_smallest_enclosing_track() {
        let mut cache = PlateCache::new();
        let mut ocr = ScriptedOcr::new(vec![reading("B1234XYZ", 0.9)]);
        let tracks = [track(1, 0.0, 0.0, 200.0, 120.0), track(2, 30.0, 50.0, 110.0, 90.0)];
        let events = cache.observe(&tracks, &[plate(40.0, 60.0, 100.0, 80.0)], &scene(), &mut ocr);
        assert_eq!(events[0].track_id, 2);
        assert!(!cache.contains(1));
    }

    #[test]
    fn ocr_sees_dark_glyphs_as_ink() -> Result<()> {
        struct Capture(Option<GrayImage>);
        impl OcrEngine for Capture {
            fn name(&self) -> &'static str {
                "capture"
            }
            fn read(&mut self, image: &GrayImage) -> Result<Option<OcrReading>> {
                self.0 = Some(image.clone());
                bail!("capture only")
            }
        }

        let mut frame = scene();
        frame.fill_rect(&Roi::new(50, 65, 4, 10), [20, 20, 20]);
        let mut ocr = Capture(None);
        PlateCache::new().observe(
            &[track(1, 0.0, 0.0, 200.0, 120.0)],
            &[plate(40.0, 60.0, 100.0, 80.0)],
            &frame,
            &mut ocr,
        );
        let image = ocr.0.expect("OCR was called");
        assert_eq!((image.width, image.height), (60, 20));
        let ink = image.pixels().iter().filter(|&&v| v == 255).count();
        assert_eq!(ink, 40);
        Ok(())
    }

    #[test]
    fn normalization_keeps_alphanumerics() {
        assert_eq!(normalize_plate_text("b 1234-xyz\n"), Some("B1234XYZ".to_string()));
        assert_eq!(normalize_plate_text("  .. "), None);
        assert_eq!(normalize_plate_text(""), None);
    }
}
