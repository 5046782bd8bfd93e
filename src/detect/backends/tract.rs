#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{ObjectDetector, OccupancyClassifier, PlateDetector};
use crate::detect::result::{non_max_suppression, Detection, PlateDetection};
use crate::frame::{BoxCorners, Frame};

type Plan = TypedRunnableModel<TypedModel>;

/// Load an ONNX model with a fixed `1x3xHxW` f32 input.
fn load_plan(model_path: &Path, width: u32, height: u32) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

/// Nearest-neighbor resize into a normalized NCHW tensor.
fn frame_to_tensor(frame: &Frame, width: u32, height: u32) -> Result<Tensor> {
    if frame.width == 0 || frame.height == 0 {
        return Err(anyhow!("cannot run inference on an empty frame"));
    }
    let (src_w, src_h) = (frame.width as usize, frame.height as usize);
    let (dst_w, dst_h) = (width as usize, height as usize);
    let pixels = frame.pixels();
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, channel, y, x)| {
        let sx = (x * src_w / dst_w).min(src_w - 1);
        let sy = (y * src_h / dst_h).min(src_h - 1);
        pixels[(sy * src_w + sx) * 3 + channel] as f32 / 255.0
    });
    Ok(input.into_tensor())
}

// ----------------------------------------------------------------------------
// Occupancy classifier
// ----------------------------------------------------------------------------

/// ONNX occupancy classifier.
///
/// A single output value is read as the occupied probability. Two or more
/// values are read as class scores where index 0 means empty.
pub struct TractClassifier {
    model: Plan,
    width: u32,
    height: u32,
    threshold: f32,
}

impl TractClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            model: load_plan(model_path.as_ref(), width, height)?,
            width,
            height,
            threshold: 0.5,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

impl OccupancyClassifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify(&mut self, spot: &Frame) -> Result<bool> {
        let input = frame_to_tensor(spot, self.width, self.height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();

        match scores.as_slice() {
            [] => Err(anyhow!("model produced an empty output")),
            [probability] => Ok(*probability >= self.threshold),
            classes => {
                let (best, _) = classes
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &s)| {
                        if s > best.1 {
                            (i, s)
                        } else {
                            best
                        }
                    });
                Ok(best != 0)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// YOLO-style detector
// ----------------------------------------------------------------------------

/// ONNX detector for YOLOv8-style heads: output `[1, 4 + classes, anchors]`
/// with center/size boxes in input pixels.
///
/// Frames are stretched to the model input; boxes are scaled back.
pub struct TractYoloDetector {
    model: Plan,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractYoloDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            model: load_plan(model_path.as_ref(), width, height)?,
            width,
            height,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = frame_to_tensor(frame, self.width, self.height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let (channels, anchors) = (shape[1], shape[2]);

        let scale_w = frame.width as f32 / self.width as f32;
        let scale_h = frame.height as f32 / self.height as f32;

        let mut detections = Vec::new();
        for a in 0..anchors {
            let (class_id, score) = (4..channels)
                .map(|c| (c - 4, preds[[0, c, a]]))
                .fold((0, f32::NEG_INFINITY), |best, x| if x.1 > best.1 { x } else { best });
            if score < self.confidence_threshold {
                continue;
            }
            let cx = preds[[0, 0, a]] * scale_w;
            let cy = preds[[0, 1, a]] * scale_h;
            let w = preds[[0, 2, a]] * scale_w;
            let h = preds[[0, 3, a]] * scale_h;
            let bbox = BoxCorners::new(
                (cx - w / 2.0).max(0.0),
                (cy - h / 2.0).max(0.0),
                (cx + w / 2.0).min(frame.width as f32),
                (cy + h / 2.0).min(frame.height as f32),
            );
            detections.push(Detection {
                bbox,
                score,
                class_id: class_id as u32,
            });
        }

        non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }
}

impl ObjectDetector for TractYoloDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.infer(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.width, self.height, [0, 0, 0]);
        self.infer(&blank).map(|_| ())
    }
}

impl PlateDetector for TractYoloDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<PlateDetection>> {
        Ok(self
            .infer(frame)?
            .into_iter()
            .map(|d| PlateDetection {
                bbox: d.bbox,
                score: d.score,
            })
            .collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        ObjectDetector::warm_up(self)
    }
}
