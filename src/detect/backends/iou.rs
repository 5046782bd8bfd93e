use anyhow::Result;

use crate::detect::backend::Tracker;
use crate::detect::result::{Detection, Track};
use crate::frame::BoxCorners;

/// Greedy IoU tracker.
///
/// Each frame, detection/track pairs are matched in descending IoU order.
/// Unmatched detections open new tracks with fresh identifiers; unmatched tracks
/// coast for up to `max_age` frames before they are dropped. Only tracks seen in
/// the current frame are returned.
pub struct IouTracker {
    min_iou: f32,
    max_age: u32,
    tracks: Vec<ActiveTrack>,
    next_id: u64,
}

struct ActiveTrack {
    id: u64,
    bbox: BoxCorners,
    misses: u32,
}

impl IouTracker {
    pub const DEFAULT_MIN_IOU: f32 = 0.3;
    pub const DEFAULT_MAX_AGE: u32 = 30;

    pub fn new(min_iou: f32, max_age: u32) -> Self {
        Self {
            min_iou,
            max_age,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Tracks currently held, including coasting ones.
    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_IOU, Self::DEFAULT_MAX_AGE)
    }
}

impl Tracker for IouTracker {
    fn name(&self) -> &'static str {
        "iou"
    }

    fn update(&mut self, detections: &[Detection]) -> Result<Vec<Track>> {
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.min_iou {
                    pairs.push((ti, di, iou));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_matched = vec![false; detections.len()];
        for (ti, di, _) in pairs {
            if track_matched[ti] || det_matched[di] {
                continue;
            }
            track_matched[ti] = true;
            det_matched[di] = true;
            self.tracks[ti].bbox = detections[di].bbox;
            self.tracks[ti].misses = 0;
        }

        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if !matched {
                track.misses += 1;
            }
        }
        let max_age = self.max_age;
        self.tracks.retain(|t| t.misses <= max_age);

        for (det, matched) in detections.iter().zip(&det_matched) {
            if *matched {
                continue;
            }
            log::debug!("IouTracker: new track {}", self.next_id);
            self.tracks.push(ActiveTrack {
                id: self.next_id,
                bbox: det.bbox,
                misses: 0,
            });
            self.next_id += 1;
        }

        Ok(self
            .tracks
            .iter()
            .filter(|t| t.misses == 0)
            .map(|t| Track {
                bbox: t.bbox,
                track_id: t.id,
            })
            .collect())
    }

    fn reset(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            bbox: BoxCorners::new(x1, y1, x2, y2),
            score: 0.9,
            class_id: 2,
        }
    }

    #[test]
    fn moving_object_keeps_its_identifier() -> Result<()> {
        let mut tracker = IouTracker::default();
        let first = tracker.update(&[det(0.0, 0.0, 100.0, 50.0)])?;
        assert_eq!(first.len(), 1);
        let id = first[0].track_id;

        for step in 1..10 {
            let dx = step as f32 * 6.0;
            let tracks = tracker.update(&[det(dx, 0.0, 100.0 + dx, 50.0)])?;
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].track_id, id);
        }
        Ok(())
    }

    #[test]
    fn separate_objects_get_separate_identifiers() -> Result<()> {
        let mut tracker = IouTracker::default();
        let tracks = tracker.update(&[det(0.0, 0.0, 10.0, 10.0), det(50.0, 50.0, 60.0, 60.0)])?;
        assert_eq!(tracks.len(), 2);
        assert_ne!(tracks[0].track_id, tracks[1].track_id);
        Ok(())
    }

    #[test]
    fn reset_drops_tracks_without_reusing_identifiers() -> Result<()> {
        let mut tracker = IouTracker::default();
        let id = tracker.update(&[det(0.0, 0.0, 10.0, 10.0)])?[0].track_id;
        tracker.reset();
        assert_eq!(tracker.active_tracks(), 0);
        let after = tracker.update(&[det(0.0, 0.0, 10.0, 10.0)])?;
        assert_eq!(after.len(), 1);
        assert_ne!(after[0].track_id, id);
        Ok(())
    }

    #[test]
    fn tracks_coast_then_expire() -> Result<()> {
        let mut tracker = IouTracker::new(0.3, 2);
        let id = tracker.update(&[det(0.0, 0.0, 10.0, 10.0)])?[0].track_id;

        assert!(tracker.update(&[])?.is_empty());
        assert_eq!(tracker.active_tracks(), 1);
        let back = tracker.update(&[det(1.0, 0.0, 11.0, 10.0)])?;
        assert_eq!(back[0].track_id, id);

        for _ in 0..3 {
            tracker.update(&[])?;
        }
        assert_eq!(tracker.active_tracks(), 0);
        let fresh = tracker.update(&[det(0.0, 0.0, 10.0, 10.0)])?;
        assert_ne!(fresh[0].track_id, id);
        Ok(())
    }
}
