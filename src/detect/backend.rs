//! Inference contracts used by the pipelines.
//!
//! # Call Discipline
//!
//! Every call is synchronous and blocking. A pipeline issues them strictly in
//! sequence for a frame (detector, tracker, plate detector, OCR or classifier)
//! and treats an `Err` as "nothing found this call". Implementations must not
//! keep references to the frames they are handed; frames are borrowed for the
//! duration of the call only.

use anyhow::Result;

use crate::frame::{Frame, GrayImage};

use super::result::{Detection, OcrReading, PlateDetection, Track};

/// Finds objects in a full frame.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Boxes are in frame pixel coordinates. Class filtering is the caller's job.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Assigns stable identifiers to detections across consecutive frames.
///
/// Loss of track and identifier reuse are the tracker's policy. Callers must
/// assume an identifier may come back for a different object after a long absence.
pub trait Tracker: Send {
    fn name(&self) -> &'static str;

    fn update(&mut self, detections: &[Detection]) -> Result<Vec<Track>>;

    /// Forget every track.
    fn reset(&mut self) {}
}

/// Finds license plates in a full frame.
pub trait PlateDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<PlateDetection>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reads text from a binarized plate crop.
pub trait OcrEngine: Send {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the engine saw no text.
    fn read(&mut self, image: &GrayImage) -> Result<Option<OcrReading>>;
}

/// Decides whether a cropped parking spot holds a vehicle.
pub trait OccupancyClassifier: Send {
    fn name(&self) -> &'static str;

    /// Returns true for an occupied spot.
    fn classify(&mut self, spot: &Frame) -> Result<bool>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
