use anyhow::Result;

use crate::detect::backend::OcrEngine;
use crate::detect::result::OcrReading;
use crate::frame::GrayImage;

/// Stub OCR for tests and the synthetic scenes.
///
/// Produces `SYNnnnn` from a checksum of the binarized crop, so identical plates
/// read identically. A crop without any ink reads as nothing.
pub struct StubOcr {
    confidence: f32,
}

impl StubOcr {
    pub fn new() -> Self {
        Self { confidence: 0.9 }
    }
}

impl Default for StubOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for StubOcr {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn read(&mut self, image: &GrayImage) -> Result<Option<OcrReading>> {
        if !image.pixels().iter().any(|&v| v != 0) {
            return Ok(None);
        }

        // FNV-1a
        let mut hash: u32 = 0x811c_9dc5;
        for &v in image.pixels() {
            hash ^= v as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }

        Ok(Some(OcrReading {
            text: format!("SYN{:04}", hash % 10_000),
            confidence: self.confidence,
        }))
    }
}
