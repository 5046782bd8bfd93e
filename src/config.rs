use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{BackendOptions, VEHICLE_CLASSES};
use crate::ingest::synthetic::parking_grid;
use crate::ingest::SourceSettings;
use crate::parking::{SpotLayout, DEFAULT_DIFF_RATIO, DEFAULT_SAMPLE_INTERVAL};

const DEFAULT_PARKING_SOURCE: &str = "stub://parking";
const DEFAULT_PLATE_SOURCE: &str = "stub://traffic";
const DEFAULT_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_SYNTHETIC_FRAMES: u64 = 300;
const DEFAULT_CLASSIFIER: &str = "cpu";
const DEFAULT_DETECTOR: &str = "color-blob";
const DEFAULT_TRACKER: &str = "iou";
const DEFAULT_OCR: &str = "stub";
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct LotwatchConfigFile {
    parking: Option<ParkingConfigFile>,
    plates: Option<PlatesConfigFile>,
    report: Option<ReportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    location: Option<String>,
    live: Option<bool>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    synthetic_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    name: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    threshold: Option<f32>,
    max_age: Option<u32>,
    language: Option<String>,
    data_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ParkingConfigFile {
    source: Option<SourceConfigFile>,
    layout: Option<PathBuf>,
    sample_interval: Option<u64>,
    diff_ratio: Option<f64>,
    classifier: Option<BackendConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PlatesConfigFile {
    source: Option<SourceConfigFile>,
    vehicle_classes: Option<Vec<u32>>,
    detector: Option<BackendConfigFile>,
    tracker: Option<BackendConfigFile>,
    plate_detector: Option<BackendConfigFile>,
    ocr: Option<BackendConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ReportConfigFile {
    dir: Option<PathBuf>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LotwatchConfig {
    pub parking: ParkingSettings,
    pub plates: PlateSettings,
    pub report: ReportSettings,
}

/// A backend name plus the options handed to its factory.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub name: String,
    pub options: BackendOptions,
}

#[derive(Debug, Clone)]
pub struct ParkingSettings {
    pub source: SourceSettings,
    /// Spot layout file. Only the synthetic lot may omit it.
    pub layout: Option<PathBuf>,
    pub sample_interval: u64,
    pub diff_ratio: f64,
    pub classifier: BackendSettings,
}

#[derive(Debug, Clone)]
pub struct PlateSettings {
    pub source: SourceSettings,
    pub vehicle_classes: Vec<u32>,
    pub detector: BackendSettings,
    pub tracker: BackendSettings,
    pub plate_detector: BackendSettings,
    pub ocr: BackendSettings,
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Reports are only written when a directory is set.
    pub dir: Option<PathBuf>,
    pub interval: Duration,
}

impl LotwatchConfig {
    /// Load from the file named by `LOTWATCH_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LOTWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, reading `path` instead of `LOTWATCH_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LotwatchConfigFile) -> Self {
        let parking = file.parking.unwrap_or_default();
        let plates = file.plates.unwrap_or_default();
        let report = file.report.unwrap_or_default();

        let parking = ParkingSettings {
            source: parking
                .source
                .unwrap_or_default()
                .into_settings(DEFAULT_PARKING_SOURCE),
            layout: parking.layout,
            sample_interval: parking.sample_interval.unwrap_or(DEFAULT_SAMPLE_INTERVAL),
            diff_ratio: parking.diff_ratio.unwrap_or(DEFAULT_DIFF_RATIO),
            classifier: parking
                .classifier
                .unwrap_or_default()
                .into_settings(DEFAULT_CLASSIFIER, 64),
        };
        let plates = PlateSettings {
            source: plates
                .source
                .unwrap_or_default()
                .into_settings(DEFAULT_PLATE_SOURCE),
            vehicle_classes: plates
                .vehicle_classes
                .unwrap_or_else(|| VEHICLE_CLASSES.to_vec()),
            detector: plates
                .detector
                .unwrap_or_default()
                .into_settings(DEFAULT_DETECTOR, 640),
            tracker: plates
                .tracker
                .unwrap_or_default()
                .into_settings(DEFAULT_TRACKER, 0),
            plate_detector: plates
                .plate_detector
                .unwrap_or_default()
                .into_settings(DEFAULT_DETECTOR, 640),
            ocr: plates.ocr.unwrap_or_default().into_settings(DEFAULT_OCR, 0),
        };
        let report = ReportSettings {
            dir: report.dir,
            interval: Duration::from_secs(
                report.interval_secs.unwrap_or(DEFAULT_REPORT_INTERVAL_SECS),
            ),
        };
        Self {
            parking,
            plates,
            report,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(location) = std::env::var("LOTWATCH_PARKING_SOURCE") {
            if !location.trim().is_empty() {
                self.parking.source.location = location;
            }
        }
        if let Ok(location) = std::env::var("LOTWATCH_PLATE_SOURCE") {
            if !location.trim().is_empty() {
                self.plates.source.location = location;
            }
        }
        if let Ok(path) = std::env::var("LOTWATCH_SPOT_LAYOUT") {
            if !path.trim().is_empty() {
                self.parking.layout = Some(PathBuf::from(path));
            }
        }
        if let Ok(interval) = std::env::var("LOTWATCH_SAMPLE_INTERVAL") {
            self.parking.sample_interval = interval.trim().parse().map_err(|_| {
                anyhow!("LOTWATCH_SAMPLE_INTERVAL must be an integer number of frames")
            })?;
        }
        if let Ok(dir) = std::env::var("LOTWATCH_REPORT_DIR") {
            if !dir.trim().is_empty() {
                self.report.dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(interval) = std::env::var("LOTWATCH_REPORT_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("LOTWATCH_REPORT_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.report.interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_source("parking", &self.parking.source)?;
        validate_source("plates", &self.plates.source)?;

        if self.parking.sample_interval == 0 {
            bail!("parking sample interval must be greater than zero");
        }
        if !(0.0..1.0).contains(&self.parking.diff_ratio) {
            bail!(
                "parking diff ratio must be in [0, 1), got {}",
                self.parking.diff_ratio
            );
        }
        if self.parking.layout.is_none() && !is_synthetic_lot(&self.parking.source) {
            bail!(
                "parking layout is required for source '{}'",
                self.parking.source.location
            );
        }
        if self.plates.vehicle_classes.is_empty() {
            bail!("plates vehicle class list must not be empty");
        }
        for (role, backend) in [
            ("parking classifier", &self.parking.classifier),
            ("plates detector", &self.plates.detector),
            ("plates tracker", &self.plates.tracker),
            ("plates plate detector", &self.plates.plate_detector),
            ("plates ocr", &self.plates.ocr),
        ] {
            if backend.name.trim().is_empty() {
                bail!("{} backend name must not be empty", role);
            }
        }
        if self.report.interval.as_secs() == 0 {
            bail!("report interval must be greater than zero");
        }
        Ok(())
    }
}

impl ParkingSettings {
    /// The configured layout, or the painted grid of the synthetic lot.
    pub fn load_layout(&self) -> Result<SpotLayout> {
        match &self.layout {
            Some(path) => SpotLayout::load(path),
            None if is_synthetic_lot(&self.source) => {
                SpotLayout::from_rois(parking_grid(self.source.width, self.source.height))
            }
            None => Err(anyhow!(
                "parking layout is required for source '{}'",
                self.source.location
            )),
        }
    }
}

impl SourceConfigFile {
    fn into_settings(self, default_location: &str) -> SourceSettings {
        SourceSettings {
            location: self
                .location
                .unwrap_or_else(|| default_location.to_string()),
            live: self.live.unwrap_or(false),
            target_fps: self.target_fps.unwrap_or(DEFAULT_FPS),
            width: self.width.unwrap_or(DEFAULT_WIDTH),
            height: self.height.unwrap_or(DEFAULT_HEIGHT),
            synthetic_frames: self.synthetic_frames.unwrap_or(DEFAULT_SYNTHETIC_FRAMES),
        }
    }
}

impl BackendConfigFile {
    fn into_settings(self, default_name: &str, default_input: u32) -> BackendSettings {
        BackendSettings {
            name: self.name.unwrap_or_else(|| default_name.to_string()),
            options: BackendOptions {
                model_path: self.model_path,
                input_width: self.input_width.unwrap_or(default_input),
                input_height: self.input_height.unwrap_or(default_input),
                threshold: self.threshold,
                max_age: self.max_age,
                language: self.language,
                data_path: self.data_path,
            },
        }
    }
}

fn is_synthetic_lot(source: &SourceSettings) -> bool {
    source.location.starts_with("stub://parking")
}

fn validate_source(role: &str, source: &SourceSettings) -> Result<()> {
    if source.location.trim().is_empty() {
        bail!("{} source location must not be empty", role);
    }
    if source.width == 0 || source.height == 0 {
        bail!("{} source frame size must be non-zero", role);
    }
    if source.location.starts_with("stub://") && source.synthetic_frames == 0 {
        bail!("{} synthetic source needs at least one frame", role);
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<LotwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_run_the_synthetic_scenes() -> Result<()> {
        let cfg = LotwatchConfig::from_file(LotwatchConfigFile::default());
        cfg.validate()?;
        assert_eq!(cfg.parking.source.location, "stub://parking");
        assert_eq!(cfg.plates.source.location, "stub://traffic");
        assert_eq!(cfg.parking.sample_interval, 30);
        assert_eq!(cfg.plates.vehicle_classes, vec![2, 3, 5, 7]);
        assert_eq!(cfg.plates.ocr.name, "stub");
        assert_eq!(cfg.report.interval, Duration::from_secs(10));
        assert_eq!(cfg.parking.load_layout()?.len(), 10);
        Ok(())
    }

    #[test]
    fn real_sources_need_a_layout() {
        let mut cfg = LotwatchConfig::from_file(LotwatchConfigFile::default());
        cfg.parking.source.location = "/var/lib/lotwatch/lot.mp4".to_string();
        assert!(cfg.validate().is_err());
        assert!(cfg.parking.load_layout().is_err());
    }

    #[test]
    fn rejects_bad_sampling_settings() {
        let mut cfg = LotwatchConfig::from_file(LotwatchConfigFile::default());
        cfg.parking.sample_interval = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = LotwatchConfig::from_file(LotwatchConfigFile::default());
        cfg.parking.diff_ratio = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = LotwatchConfig::from_file(LotwatchConfigFile::default());
        cfg.plates.vehicle_classes.clear();
        assert!(cfg.validate().is_err());
    }
}
