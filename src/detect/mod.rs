//! Inference backends: object detection, tracking, plate detection, OCR and
//! spot occupancy classification.

mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::{ObjectDetector, OccupancyClassifier, OcrEngine, PlateDetector, Tracker};
pub use registry::{BackendOptions, BackendRegistry};
pub use result::{
    non_max_suppression, retain_classes, Detection, OcrReading, PlateDetection, Track,
    VEHICLE_CLASSES,
};
