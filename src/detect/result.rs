use serde::{Deserialize, Serialize};

use crate::frame::BoxCorners;

/// COCO class ids treated as vehicles: car, motorcycle, bus, truck.
pub const VEHICLE_CLASSES: [u32; 4] = [2, 3, 5, 7];

/// Object detector output, in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoxCorners,
    pub score: f32,
    pub class_id: u32,
}

/// A tracked object. `track_id` is stable while the object stays visible.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub bbox: BoxCorners,
    pub track_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlateDetection {
    pub bbox: BoxCorners,
    pub score: f32,
}

/// Text read from a plate crop.
#[derive(Clone, Debug, PartialEq)]
pub struct OcrReading {
    pub text: String,
    pub confidence: f32,
}

/// Keep only detections whose class is in `allowed`.
pub fn retain_classes(detections: Vec<Detection>, allowed: &[u32]) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| allowed.contains(&d.class_id))
        .collect()
}

/// Greedy non-maximum suppression: keep the highest-scoring box of every
/// cluster whose pairwise IoU exceeds `iou_threshold`.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept)
            .any(|prev| detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold);
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
