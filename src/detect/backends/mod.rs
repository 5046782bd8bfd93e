pub mod cpu;
pub mod iou;
pub mod stub;

#[cfg(feature = "ocr-tesseract")]
pub mod tesseract;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::{ColorBlobDetector, IntensityClassifier};
pub use iou::IouTracker;
pub use stub::StubOcr;

#[cfg(feature = "ocr-tesseract")]
pub use tesseract::TesseractOcr;
#[cfg(feature = "backend-tract")]
pub use tract::{TractClassifier, TractYoloDetector};
