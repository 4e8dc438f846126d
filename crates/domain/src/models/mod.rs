//! Domain models for Ridepool.

pub mod channel;
pub mod group;
pub mod message;
pub mod ride;
pub mod user;

pub use group::{Group, GroupStatus, MemberStatus, RosterKind};
pub use message::ChatMessage;
pub use ride::{GenderPreference, GeoPoint, RideRequest, RideStatus};
pub use user::{Gender, PublicUserProfile};
