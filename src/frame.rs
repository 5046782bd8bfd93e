//! Frame and region primitives shared by both pipelines.
//!
//! - `Frame`: owned RGB24 pixel buffer. Cloning produces an independent copy, which
//!   is what the occupancy sampler keeps as its reference frame.
//! - `Roi`: integer pixel rectangle (x, y, width, height) used for parking spots.
//! - `BoxCorners`: float corner box (x1, y1, x2, y2) produced by detectors and trackers.
//! - `GrayImage`: single-channel image handed to OCR engines.
//!
//! Region helpers never panic on out-of-bounds input. A region that does not fit
//! the frame is reported as `None` and the caller decides whether to skip it.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Threshold used when binarizing plate crops before OCR.
pub const PLATE_BINARY_THRESHOLD: u8 = 64;

// ----------------------------------------------------------------------------
// Frame: owned RGB24 pixels
// ----------------------------------------------------------------------------

/// Owned RGB24 frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap an RGB24 buffer. The buffer length must be `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{} frame, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Copy an RGB24 image whose rows are `stride` bytes apart.
    ///
    /// Decoders pad rows to an alignment; the padding is dropped.
    pub fn from_strided(data: &[u8], stride: usize, width: u32, height: u32) -> Result<Self> {
        let row_bytes = width as usize * 3;
        if stride < row_bytes {
            return Err(anyhow!(
                "row stride {} is shorter than {} bytes of RGB",
                stride,
                row_bytes
            ));
        }
        let rows = height as usize;
        if rows == 0 || row_bytes == 0 {
            return Self::new(Vec::new(), width, height);
        }
        let needed = stride * (rows - 1) + row_bytes;
        if data.len() < needed {
            return Err(anyhow!(
                "decoded image holds {} bytes, {}x{} needs {}",
                data.len(),
                width,
                height,
                needed
            ));
        }
        let pixels = data
            .chunks(stride)
            .take(rows)
            .flat_map(|row| &row[..row_bytes])
            .copied()
            .collect();
        Self::new(pixels, width, height)
    }

    /// Frame filled with a single color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixel_count = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixel_count * 3);
        for _ in 0..pixel_count {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// True when `roi` has a non-zero area and lies fully inside the frame.
    pub fn contains(&self, roi: &Roi) -> bool {
        roi.width > 0
            && roi.height > 0
            && roi.right() <= self.width as u64
            && roi.bottom() <= self.height as u64
    }

    /// Copy the pixels under `roi` into a new frame.
    pub fn crop(&self, roi: &Roi) -> Option<Frame> {
        if !self.contains(roi) {
            return None;
        }
        let row_bytes = roi.width as usize * 3;
        let mut data = Vec::with_capacity(row_bytes * roi.height as usize);
        for row in self.rows(roi) {
            data.extend_from_slice(row);
        }
        Some(Frame {
            data,
            width: roi.width,
            height: roi.height,
        })
    }

    /// Mean over every channel byte under `roi`, without copying the region.
    pub fn region_mean(&self, roi: &Roi) -> Option<f64> {
        if !self.contains(roi) {
            return None;
        }
        let sum: u64 = self
            .rows(roi)
            .map(|row| row.iter().map(|&b| b as u64).sum::<u64>())
            .sum();
        let count = roi.area() * 3;
        Some(sum as f64 / count as f64)
    }

    /// Clip a detector box to the frame. Returns `None` for an empty intersection.
    pub fn clip(&self, corners: &BoxCorners) -> Option<Roi> {
        corners.to_roi_clipped(self.width, self.height)
    }

    /// Luma conversion (ITU-R BT.601 weights).
    pub fn to_gray(&self) -> GrayImage {
        let data = self
            .data
            .chunks_exact(3)
            .map(|px| {
                let luma = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
                ((luma + 500) / 1000) as u8
            })
            .collect();
        GrayImage {
            data,
            width: self.width,
            height: self.height,
        }
    }

    /// Paint `roi` (clipped to the frame) with a solid color.
    pub fn fill_rect(&mut self, roi: &Roi, rgb: [u8; 3]) {
        let x_end = (roi.right()).min(self.width as u64) as u32;
        let y_end = (roi.bottom()).min(self.height as u64) as u32;
        for y in roi.y.min(self.height)..y_end {
            for x in roi.x.min(self.width)..x_end {
                let idx = (y as usize * self.width as usize + x as usize) * 3;
                self.data[idx..idx + 3].copy_from_slice(&rgb);
            }
        }
    }

    fn rows<'a>(&'a self, roi: &Roi) -> impl Iterator<Item = &'a [u8]> + 'a {
        let stride = self.width as usize * 3;
        let start_col = roi.x as usize * 3;
        let row_bytes = roi.width as usize * 3;
        (roi.y as usize..roi.y as usize + roi.height as usize).map(move |row| {
            let start = row * stride + start_col;
            &self.data[start..start + row_bytes]
        })
    }
}

// ----------------------------------------------------------------------------
// Roi: integer pixel rectangle
// ----------------------------------------------------------------------------

/// Integer pixel rectangle in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn corners(&self) -> BoxCorners {
        BoxCorners::new(
            self.x as f32,
            self.y as f32,
            self.right() as f32,
            self.bottom() as f32,
        )
    }
}

// ----------------------------------------------------------------------------
// BoxCorners: detector/tracker boxes
// ----------------------------------------------------------------------------

/// Float box given by its top-left and bottom-right corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxCorners {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoxCorners {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// True when `inner` lies fully inside this box (edges may touch).
    pub fn encloses(&self, inner: &BoxCorners) -> bool {
        self.x1 <= inner.x1 && self.y1 <= inner.y1 && self.x2 >= inner.x2 && self.y2 >= inner.y2
    }

    pub fn intersection_area(&self, other: &BoxCorners) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    pub fn iou(&self, other: &BoxCorners) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Truncate to integer pixels and intersect with a `width` x `height` frame.
    pub fn to_roi_clipped(&self, width: u32, height: u32) -> Option<Roi> {
        if !(self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite())
        {
            return None;
        }
        let x1 = self.x1.max(0.0).min(width as f32) as u32;
        let y1 = self.y1.max(0.0).min(height as f32) as u32;
        let x2 = self.x2.max(0.0).min(width as f32) as u32;
        let y2 = self.y2.max(0.0).min(height as f32) as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Roi::new(x1, y1, x2 - x1, y2 - y1))
    }
}

// ----------------------------------------------------------------------------
// GrayImage: OCR input
// ----------------------------------------------------------------------------

/// Single-channel 8-bit image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GrayImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("gray image dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} gray bytes for {}x{} image, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Inverse binary threshold: values above `threshold` become 0, the rest 255.
    pub fn binarize_inverse(&self, threshold: u8) -> GrayImage {
        GrayImage {
            data: self
                .data
                .iter()
                .map(|&v| if v > threshold { 0 } else { 255 })
                .collect(),
            width: self.width,
            height: self.height,
        }
    }
}

// ----------------------------------------------------------------------------
// Connected components
// ----------------------------------------------------------------------------

/// Bounding boxes of the 4-connected components of `mask`.
///
/// Components are returned in the order a row-major scan first reaches them.
/// `mask` holds one flag per pixel; a mask of the wrong length yields no components.
pub fn connected_components(mask: &[bool], width: u32, height: u32) -> Vec<Roi> {
    let (w, h) = (width as usize, height as usize);
    if mask.len() != w * h {
        return Vec::new();
    }
    let mut visited = vec![false; mask.len()];
    let mut stack = Vec::new();
    let mut components = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let (mut min_x, mut min_y) = (start % w, start / w);
        let (mut max_x, mut max_y) = (min_x, min_y);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            let mut visit = |n: usize| {
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        components.push(Roi::new(
            min_x as u32,
            min_y as u32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        ));
    }
    components
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_rows_drop_padding() -> Result<()> {
        // 2x2 RGB, rows padded to 8 bytes; the last row is unpadded.
        let data = [
            1, 2, 3, 4, 5, 6, 0, 0, //
            7, 8, 9, 10, 11, 12,
        ];
        let frame = Frame::from_strided(&data, 8, 2, 2)?;
        assert_eq!(frame.pixels(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(Frame::from_strided(&data, 4, 2, 2).is_err());
        assert!(Frame::from_strided(&data[..10], 8, 2, 2).is_err());
        Ok(())
    }

    #[test]
    fn components_follow_scan_order() {
        #[rustfmt::skip]
        let mask = [
            0, 0, 0, 1, 1,
            1, 1, 0, 1, 1,
            1, 0, 0, 0, 0,
            0, 0, 1, 0, 0,
        ]
        .map(|v| v == 1);
        let components = connected_components(&mask, 5, 4);
        assert_eq!(
            components,
            vec![
                Roi::new(3, 0, 2, 2),
                Roi::new(0, 1, 2, 2),
                Roi::new(2, 3, 1, 1),
            ]
        );
    }

    #[test]
    fn diagonal_pixels_are_separate_components() {
        let mask = [true, false, false, true];
        assert_eq!(connected_components(&mask, 2, 2).len(), 2);
        assert!(connected_components(&mask, 3, 3).is_empty());
    }

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = (x + y * width) as u8;
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(data, width, height).unwrap()
    }

    #[test]
    fn new_rejects_wrong_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn crop_copies_region_rows() {
        let frame = gradient_frame(4, 4);
        let crop = frame.crop(&Roi::new(1, 1, 2, 2)).unwrap();
        assert_eq!(crop.width, 2);
        assert_eq!(crop.height, 2);
        assert_eq!(crop.pixel(0, 0), Some([5, 5, 5]));
        assert_eq!(crop.pixel(1, 1), Some([10, 10, 10]));
    }

    #[test]
    fn out_of_bounds_regions_are_rejected() {
        let frame = gradient_frame(4, 4);
        assert!(frame.crop(&Roi::new(3, 3, 2, 2)).is_none());
        assert!(frame.region_mean(&Roi::new(0, 0, 5, 1)).is_none());
        assert!(frame.crop(&Roi::new(0, 0, 0, 2)).is_none());
        assert!(frame.contains(&Roi::new(0, 0, 4, 4)));
    }

    #[test]
    fn region_mean_matches_crop_mean() {
        let frame = gradient_frame(4, 4);
        let roi = Roi::new(0, 0, 2, 2);
        // values 0, 1, 4, 5
        assert_eq!(frame.region_mean(&roi), Some(2.5));
    }

    #[test]
    fn enclosure_allows_touching_edges() {
        let outer = BoxCorners::new(0.0, 0.0, 100.0, 100.0);
        assert!(outer.encloses(&BoxCorners::new(0.0, 0.0, 100.0, 100.0)));
        assert!(outer.encloses(&BoxCorners::new(20.0, 20.0, 30.0, 30.0)));
        assert!(!outer.encloses(&BoxCorners::new(90.0, 90.0, 101.0, 95.0)));
    }

    #[test]
    fn clipping_drops_empty_intersections() {
        let frame = Frame::filled(10, 10, [0, 0, 0]);
        assert_eq!(
            frame.clip(&BoxCorners::new(-5.0, 2.0, 4.5, 8.0)),
            Some(Roi::new(0, 2, 4, 6))
        );
        assert_eq!(frame.clip(&BoxCorners::new(12.0, 0.0, 20.0, 5.0)), None);
        assert_eq!(frame.clip(&BoxCorners::new(3.0, 3.0, 3.0, 9.0)), None);
    }

    #[test]
    fn binarize_inverts_around_threshold() {
        let gray = GrayImage::new(vec![0, 64, 65, 255], 2, 2).unwrap();
        let bin = gray.binarize_inverse(PLATE_BINARY_THRESHOLD);
        assert_eq!(bin.pixels(), &[255, 255, 0, 0]);
    }

    #[test]
    fn gray_conversion_keeps_neutral_values() {
        let frame = Frame::filled(2, 1, [128, 128, 128]);
        assert_eq!(frame.to_gray().pixels(), &[128, 128]);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoxCorners::new(0.0, 0.0, 10.0, 10.0);
        assert!((b.iou(&b) - 1.0).abs() < f32::EPSILON);
        assert_eq!(b.iou(&BoxCorners::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }
}
