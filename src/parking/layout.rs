//! Static parking spot layout.
//!
//! The layout is built once at startup and never changes size. Sources:
//! - a JSON or TOML file: `{"spots": [[x, y, w, h], ...]}`
//! - a mask image (feature: layout-mask): every 4-connected region of non-zero
//!   pixels is one spot
//!
//! Spots are numbered in the order they are listed, or for masks in the order a
//! row-major scan first reaches them.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::frame::{connected_components, GrayImage, Roi};

/// One parking spot. Immutable after the layout is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ParkingSpot {
    pub index: usize,
    pub roi: Roi,
}

impl ParkingSpot {
    /// Operator-facing label, `P1` for index 0.
    pub fn label(&self) -> String {
        spot_label(self.index)
    }
}

pub fn spot_label(index: usize) -> String {
    format!("P{}", index + 1)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpotLayout {
    spots: Vec<ParkingSpot>,
}

#[derive(Debug, Deserialize)]
struct LayoutFile {
    spots: Vec<[u32; 4]>,
}

impl SpotLayout {
    /// Layout from explicit rectangles. Fails on an empty list or a zero-area spot.
    pub fn from_rois(rois: Vec<Roi>) -> Result<Self> {
        if rois.is_empty() {
            bail!("spot layout is empty");
        }
        if let Some(pos) = rois.iter().position(|r| r.area() == 0) {
            bail!("spot {} has zero area", spot_label(pos));
        }
        let spots = rois
            .into_iter()
            .enumerate()
            .map(|(index, roi)| ParkingSpot { index, roi })
            .collect();
        Ok(Self { spots })
    }

    /// One spot per connected region of non-zero mask pixels.
    pub fn from_mask(mask: &GrayImage) -> Result<Self> {
        let flags: Vec<bool> = mask.pixels().iter().map(|&v| v != 0).collect();
        let rois = connected_components(&flags, mask.width, mask.height);
        if rois.is_empty() {
            bail!("spot mask {}x{} has no marked regions", mask.width, mask.height);
        }
        Self::from_rois(rois)
    }

    /// Load a layout file, picking the format from the extension
    /// (`.json`, `.toml`, or with layout-mask `.png`).
    pub fn load(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let layout = match extension.as_str() {
            "json" | "toml" => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read spot layout {}", path.display()))?;
                let file: LayoutFile = if extension == "json" {
                    serde_json::from_str(&contents)
                        .with_context(|| format!("invalid JSON spot layout {}", path.display()))?
                } else {
                    toml::from_str(&contents)
                        .with_context(|| format!("invalid TOML spot layout {}", path.display()))?
                };
                let rois = file
                    .spots
                    .into_iter()
                    .map(|[x, y, w, h]| Roi::new(x, y, w, h))
                    .collect();
                Self::from_rois(rois)
            }
            "png" => load_mask(path).and_then(|mask| Self::from_mask(&mask)),
            other => Err(anyhow!("unsupported spot layout format '{}'", other)),
        }
        .with_context(|| format!("failed to load spot layout {}", path.display()))?;

        log::info!(
            "loaded {} parking spots from {}",
            layout.len(),
            path.display()
        );
        Ok(layout)
    }

    pub fn spots(&self) -> &[ParkingSpot] {
        &self.spots
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    /// Always false for a constructed layout.
    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }
}

#[cfg(feature = "layout-mask")]
fn load_mask(path: &Path) -> Result<GrayImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode mask image {}", path.display()))?
        .to_luma8();
    let (width, height) = image.dimensions();
    GrayImage::new(image.into_raw(), width, height)
}

#[cfg(not(feature = "layout-mask"))]
fn load_mask(path: &Path) -> Result<GrayImage> {
    Err(anyhow!(
        "mask layout {} requires the layout-mask feature",
        path.display()
    ))
}
