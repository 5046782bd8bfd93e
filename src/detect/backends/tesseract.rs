#![cfg(feature = "ocr-tesseract")]

use anyhow::{anyhow, Context, Result};
use leptess::{LepTess, Variable};

use crate::detect::backend::OcrEngine;
use crate::detect::result::OcrReading;
use crate::frame::GrayImage;

const PLATE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Tesseract OCR over binarized plate crops, read as a single text line.
pub struct TesseractOcr {
    api: LepTess,
}

// SAFETY: the Tesseract handle is owned by one pipeline and only reached through `&mut self`.
unsafe impl Send for TesseractOcr {}

impl TesseractOcr {
    /// `datapath` is the tessdata directory; `None` uses the system default.
    pub fn new(datapath: Option<&str>, language: &str) -> Result<Self> {
        let mut api = LepTess::new(datapath, language)
            .map_err(|_| anyhow!("failed to initialize tesseract for language '{language}'"))?;
        api.set_variable(Variable::TesseditPagesegMode, "7")
            .map_err(|_| anyhow!("failed to set tesseract page segmentation mode"))?;
        api.set_variable(Variable::TesseditCharWhitelist, PLATE_ALPHABET)
            .map_err(|_| anyhow!("failed to set tesseract character whitelist"))?;
        Ok(Self { api })
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn read(&mut self, image: &GrayImage) -> Result<Option<OcrReading>> {
        let pgm = encode_pgm(image);
        self.api
            .set_image_from_mem(&pgm)
            .map_err(|_| anyhow!("tesseract rejected {}x{} crop", image.width, image.height))?;
        let text = self
            .api
            .get_utf8_text()
            .context("tesseract returned invalid UTF-8")?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let confidence = self.api.mean_text_conf().clamp(0, 100) as f32 / 100.0;
        Ok(Some(OcrReading {
            text: text.to_string(),
            confidence,
        }))
    }
}

/// Binary PGM (P5), which leptonica decodes from memory.
fn encode_pgm(image: &GrayImage) -> Vec<u8> {
    let header = format!("P5\n{} {}\n255\n", image.width, image.height);
    let mut out = Vec::with_capacity(header.len() + image.pixels().len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(image.pixels());
    out
}
