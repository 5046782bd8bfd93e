//! lotwatch
//!
//! Two independent video pipelines over a parking facility:
//!
//! - **Parking occupancy**: a static spot layout is re-evaluated only at sampling
//!   boundaries (every N frames), and after the first cycle only for spots whose
//!   mean intensity moved noticeably. Everything else keeps its last status.
//! - **Plate identity**: vehicles are detected and tracked, plates are associated
//!   with the smallest enclosing vehicle box, and OCR runs at most once per
//!   track. A recognized plate is written once and never changes.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames, regions, crops, grayscale and binarization
//! - `ingest`: Frame sources (local files, RTSP, synthetic `stub://` scenes)
//! - `detect`: Backend traits, built-in backends and the backend registry
//! - `parking`: Spot layout and the occupancy sampler
//! - `plates`: Plate association, the identity cache and the operator log
//! - `pipeline`: Pause/stop control, the latest-value channel and both loops
//! - `report`: Periodic JSON and text reports
//! - `config`: Layered configuration (file, defaults, environment)

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod parking;
pub mod pipeline;
pub mod plates;
pub mod report;

pub use config::LotwatchConfig;
pub use detect::{BackendOptions, BackendRegistry};
pub use frame::{BoxCorners, Frame, GrayImage, Roi};
pub use ingest::{open_source, FrameSource, SourceSettings};
pub use parking::{OccupancySummary, SpotLayout, SpotSampler, SpotStatus};
pub use pipeline::{ParkingPipeline, PipelineControl, PlatePipeline};
pub use plates::{PlateCache, PlateEvent, PlateLog};
pub use report::{Report, ReportWriter};
