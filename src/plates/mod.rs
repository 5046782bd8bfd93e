//! Plate identity: which vehicle track a plate belongs to, and the write-once
//! memo of recognized plate text per track.

mod association;
mod cache;
mod plate_log;

pub use association::associate;
pub use cache::{normalize_plate_text, PlateCache, PlateCacheEntry, PlateEvent};
pub use plate_log::PlateLog;
pub(crate) use plate_log::clock_time;
