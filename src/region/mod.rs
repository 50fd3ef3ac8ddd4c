//! Quadrilateral regions from the external region detector and matching of
//! predictions against them.

mod detector;
mod matcher;

pub use detector::{DetectedRegion, RegionDetector, RegionQuery, StubRegionDetector};
pub use matcher::{RegionMatch, RegionMatcher, DEFAULT_MATCH_THRESHOLD};
