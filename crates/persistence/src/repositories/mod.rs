//! Repository implementations for database access.

pub mod group;
pub mod message;
pub mod ride;
pub mod user;

pub use group::GroupRepository;
pub use message::MessageRepository;
pub use ride::RideRepository;
pub use user::UserRepository;
