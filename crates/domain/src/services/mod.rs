//! Domain services for Ridepool.
//!
//! Services contain business logic that operates on domain models.

pub mod matching;

pub use matching::{is_compatible, rank_candidates, MatchOptions, MAX_POINT_DISTANCE_METERS};
