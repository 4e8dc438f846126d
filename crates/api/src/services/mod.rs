//! Coordination services: group lifecycle, readiness consensus, rooms,
//! and the optional directions collaborator.

pub mod coordinator;
pub mod directions;
pub mod lifecycle;
pub mod rooms;

pub use coordinator::{ReadinessCoordinator, RideStarter};
pub use directions::DirectionsClient;
pub use lifecycle::{GroupLifecycle, LifecycleError};
pub use rooms::RoomRegistry;
