use anyhow::Result;

use crate::detect::backend::{ObjectDetector, OccupancyClassifier, PlateDetector};
use crate::detect::result::{Detection, PlateDetection};
use crate::frame::{connected_components, Frame, Roi};
use crate::ingest::synthetic::{PLATE_COLOR, VEHICLE_COLOR};

/// Occupancy from texture: an empty bay is close to uniform asphalt, a parked
/// car adds edges and color changes.
///
/// The spot is occupied when the standard deviation of its luma exceeds the threshold.
pub struct IntensityClassifier {
    threshold: f64,
}

impl IntensityClassifier {
    pub const DEFAULT_THRESHOLD: f64 = 18.0;

    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for IntensityClassifier {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl OccupancyClassifier for IntensityClassifier {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn classify(&mut self, spot: &Frame) -> Result<bool> {
        let gray = spot.to_gray();
        let pixels = gray.pixels();
        if pixels.is_empty() {
            return Ok(false);
        }
        let n = pixels.len() as f64;
        let mean = pixels.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = pixels
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        Ok(variance.sqrt() > self.threshold)
    }
}

/// Detects solid-colored blobs.
///
/// Pixels within `tolerance` of the target color on every channel form a mask;
/// each 4-connected component above `min_area` becomes a detection. Serves as the
/// vehicle and plate detector for the synthetic traffic scene.
pub struct ColorBlobDetector {
    color: [u8; 3],
    tolerance: u8,
    min_area: u64,
    aspect_range: Option<(f32, f32)>,
    class_id: u32,
}

impl ColorBlobDetector {
    pub fn new(color: [u8; 3], tolerance: u8, min_area: u64, class_id: u32) -> Self {
        Self {
            color,
            tolerance,
            min_area,
            aspect_range: None,
            class_id,
        }
    }

    /// Vehicle bodies of the synthetic traffic scene, reported as cars.
    pub fn vehicles() -> Self {
        Self::new(VEHICLE_COLOR, 40, 400, 2)
    }

    /// Plates of the synthetic traffic scene.
    pub fn plates() -> Self {
        Self::new(PLATE_COLOR, 30, 120, 0).with_aspect_range(2.0, 6.0)
    }

    /// Only accept blobs whose width/height ratio lies in `[min, max]`.
    pub fn with_aspect_range(mut self, min: f32, max: f32) -> Self {
        self.aspect_range = Some((min, max));
        self
    }

    fn blobs(&self, frame: &Frame) -> Vec<(Roi, f32)> {
        let mask: Vec<bool> = frame
            .pixels()
            .chunks_exact(3)
            .map(|px| {
                px.iter()
                    .zip(self.color.iter())
                    .all(|(&p, &c)| p.abs_diff(c) <= self.tolerance)
            })
            .collect();

        connected_components(&mask, frame.width, frame.height)
            .into_iter()
            .filter(|roi| roi.area() >= self.min_area)
            .filter(|roi| {
                self.aspect_range.map_or(true, |(min, max)| {
                    let aspect = roi.width as f32 / roi.height as f32;
                    aspect >= min && aspect <= max
                })
            })
            .map(|roi| {
                let fill = fill_ratio(&mask, frame.width, &roi);
                (roi, fill)
            })
            .collect()
    }
}

fn fill_ratio(mask: &[bool], width: u32, roi: &Roi) -> f32 {
    let mut hits = 0u64;
    for y in roi.y..roi.y + roi.height {
        let start = (y * width + roi.x) as usize;
        hits += mask[start..start + roi.width as usize]
            .iter()
            .filter(|&&m| m)
            .count() as u64;
    }
    hits as f32 / roi.area() as f32
}

impl ObjectDetector for ColorBlobDetector {
    fn name(&self) -> &'static str {
        "color-blob"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self
            .blobs(frame)
            .into_iter()
            .map(|(roi, score)| Detection {
                bbox: roi.corners(),
                score,
                class_id: self.class_id,
            })
            .collect())
    }
}

impl PlateDetector for ColorBlobDetector {
    fn name(&self) -> &'static str {
        "color-blob"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<PlateDetection>> {
        Ok(self
            .blobs(frame)
            .into_iter()
            .map(|(roi, score)| PlateDetection {
                bbox: roi.corners(),
                score,
            })
            .collect())
    }
}
