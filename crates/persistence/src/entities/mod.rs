//! Entity definitions (database row mappings).

pub mod group;
pub mod message;
pub mod ride;
pub mod user;

pub use group::{
    GroupEntity, GroupStatusDb, PendingInviteEntity, RosterEntryEntity, RosterEntryWithUserEntity,
    RosterKindDb, RosterStatusDb,
};
pub use message::MessageWithSenderEntity;
pub use ride::{GenderPreferenceDb, MatchCandidateEntity, RideEntity, RideStatusDb};
pub use user::{GenderDb, UserEntity};
