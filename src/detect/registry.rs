use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use super::backend::{ObjectDetector, OccupancyClassifier, OcrEngine, PlateDetector, Tracker};
use super::backends::{ColorBlobDetector, IntensityClassifier, IouTracker, StubOcr};

/// Options handed to a backend factory. Each backend reads the fields it needs.
#[derive(Clone, Debug, Default)]
pub struct BackendOptions {
    /// Model file for learned backends.
    pub model_path: Option<PathBuf>,
    /// Model input size.
    pub input_width: u32,
    pub input_height: u32,
    /// Decision threshold override (classifier threshold, tracker minimum IoU, detector confidence).
    pub threshold: Option<f32>,
    /// Frames a tracker keeps an unmatched track.
    pub max_age: Option<u32>,
    /// OCR language and data directory.
    pub language: Option<String>,
    pub data_path: Option<String>,
}

impl BackendOptions {
    #[cfg(feature = "backend-tract")]
    fn require_model(&self, backend: &str) -> Result<&PathBuf> {
        self.model_path
            .as_ref()
            .ok_or_else(|| anyhow!("backend '{}' requires a model path", backend))
    }
}

type Factory<T> = Box<dyn Fn(&BackendOptions) -> Result<Box<T>> + Send + Sync>;

/// Registry of backend constructors, keyed by backend name.
///
/// Configuration names backends as strings; the registry turns a name plus
/// options into a ready-to-use, warmed-up backend.
pub struct BackendRegistry {
    classifiers: HashMap<String, Factory<dyn OccupancyClassifier>>,
    object_detectors: HashMap<String, Factory<dyn ObjectDetector>>,
    plate_detectors: HashMap<String, Factory<dyn PlateDetector>>,
    trackers: HashMap<String, Factory<dyn Tracker>>,
    ocr_engines: HashMap<String, Factory<dyn OcrEngine>>,
}

impl BackendRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            classifiers: HashMap::new(),
            object_detectors: HashMap::new(),
            plate_detectors: HashMap::new(),
            trackers: HashMap::new(),
            ocr_engines: HashMap::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        registry.register_classifier("cpu", |opts| {
            let threshold = opts
                .threshold
                .map(f64::from)
                .unwrap_or(IntensityClassifier::DEFAULT_THRESHOLD);
            Ok(Box::new(IntensityClassifier::new(threshold)))
        });
        registry.register_object_detector("color-blob", |_| {
            Ok(Box::new(ColorBlobDetector::vehicles()))
        });
        registry.register_plate_detector("color-blob", |_| Ok(Box::new(ColorBlobDetector::plates())));
        registry.register_tracker("iou", |opts| {
            Ok(Box::new(IouTracker::new(
                opts.threshold.unwrap_or(IouTracker::DEFAULT_MIN_IOU),
                opts.max_age.unwrap_or(IouTracker::DEFAULT_MAX_AGE),
            )))
        });
        registry.register_ocr("stub", |_| Ok(Box::new(StubOcr::new())));

        #[cfg(feature = "backend-tract")]
        {
            use super::backends::{TractClassifier, TractYoloDetector};

            registry.register_classifier("tract", |opts| {
                let model = opts.require_model("tract")?;
                let mut classifier =
                    TractClassifier::new(model, opts.input_width, opts.input_height)?;
                if let Some(threshold) = opts.threshold {
                    classifier = classifier.with_threshold(threshold);
                }
                Ok(Box::new(classifier))
            });
            registry.register_object_detector("tract", |opts| {
                let model = opts.require_model("tract")?;
                let mut detector =
                    TractYoloDetector::new(model, opts.input_width, opts.input_height)?;
                if let Some(threshold) = opts.threshold {
                    detector = detector.with_thresholds(threshold, 0.45);
                }
                Ok(Box::new(detector))
            });
            registry.register_plate_detector("tract", |opts| {
                let model = opts.require_model("tract")?;
                let mut detector =
                    TractYoloDetector::new(model, opts.input_width, opts.input_height)?;
                if let Some(threshold) = opts.threshold {
                    detector = detector.with_thresholds(threshold, 0.45);
                }
                Ok(Box::new(detector))
            });
        }

        #[cfg(feature = "ocr-tesseract")]
        registry.register_ocr("tesseract", |opts| {
            let language = opts.language.as_deref().unwrap_or("eng");
            Ok(Box::new(super::backends::TesseractOcr::new(
                opts.data_path.as_deref(),
                language,
            )?))
        });

        registry
    }

    pub fn register_classifier<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendOptions) -> Result<Box<dyn OccupancyClassifier>> + Send + Sync + 'static,
    {
        self.classifiers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_object_detector<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendOptions) -> Result<Box<dyn ObjectDetector>> + Send + Sync + 'static,
    {
        self.object_detectors.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_plate_detector<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendOptions) -> Result<Box<dyn PlateDetector>> + Send + Sync + 'static,
    {
        self.plate_detectors.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_tracker<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendOptions) -> Result<Box<dyn Tracker>> + Send + Sync + 'static,
    {
        self.trackers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_ocr<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendOptions) -> Result<Box<dyn OcrEngine>> + Send + Sync + 'static,
    {
        self.ocr_engines.insert(name.to_string(), Box::new(factory));
    }

    pub fn classifier(
        &self,
        name: &str,
        options: &BackendOptions,
    ) -> Result<Box<dyn OccupancyClassifier>> {
        let mut backend = build("classifier", &self.classifiers, name, options)?;
        backend.warm_up()?;
        Ok(backend)
    }

    pub fn object_detector(
        &self,
        name: &str,
        options: &BackendOptions,
    ) -> Result<Box<dyn ObjectDetector>> {
        let mut backend = build("object detector", &self.object_detectors, name, options)?;
        backend.warm_up()?;
        Ok(backend)
    }

    pub fn plate_detector(
        &self,
        name: &str,
        options: &BackendOptions,
    ) -> Result<Box<dyn PlateDetector>> {
        let mut backend = build("plate detector", &self.plate_detectors, name, options)?;
        backend.warm_up()?;
        Ok(backend)
    }

    pub fn tracker(&self, name: &str, options: &BackendOptions) -> Result<Box<dyn Tracker>> {
        build("tracker", &self.trackers, name, options)
    }

    pub fn ocr(&self, name: &str, options: &BackendOptions) -> Result<Box<dyn OcrEngine>> {
        build("OCR", &self.ocr_engines, name, options)
    }

    /// Registered backends as `kind:name`, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            ("classifier", names_of(&self.classifiers)),
            ("detector", names_of(&self.object_detectors)),
            ("plate", names_of(&self.plate_detectors)),
            ("tracker", names_of(&self.trackers)),
            ("ocr", names_of(&self.ocr_engines)),
        ]
        .into_iter()
        .flat_map(|(kind, names)| names.into_iter().map(move |n| format!("{kind}:{n}")))
        .collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn names_of<T: ?Sized>(map: &HashMap<String, Factory<T>>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

fn build<T: ?Sized>(
    kind: &str,
    map: &HashMap<String, Factory<T>>,
    name: &str,
    options: &BackendOptions,
) -> Result<Box<T>> {
    let factory = map.get(name).ok_or_else(|| {
        anyhow!(
            "{} backend '{}' not registered (available: {})",
            kind,
            name,
            names_of(map).join(", ")
        )
    })?;
    let backend = factory(options)?;
    log::debug!("built {} backend '{}'", kind, name);
    Ok(backend)
}
