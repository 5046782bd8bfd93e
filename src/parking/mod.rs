//! Parking spot occupancy: static layout plus the sampling engine that keeps
//! per-spot status current with as few classifier calls as possible.

mod layout;
mod sampler;

pub use layout::{spot_label, ParkingSpot, SpotLayout};
pub use sampler::{
    select_candidates, OccupancySummary, SampleOutcome, SamplingClock, SpotSampler, SpotStatus,
    DEFAULT_DIFF_RATIO, DEFAULT_SAMPLE_INTERVAL,
};
