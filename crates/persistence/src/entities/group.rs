//! Group and roster entities (database row mappings).

use chrono::{DateTime, Utc};
use domain::models::group::{Group, GroupStatus, MemberStatus, RosterKind};
use domain::models::user::PublicUserProfile;
use sqlx::FromRow;
use uuid::Uuid;

use super::user::GenderDb;

/// Database enum mapping for the `group_status` PostgreSQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "group_status", rename_all = "lowercase")]
pub enum GroupStatusDb {
    Open,
    Closed,
    Locked,
    Started,
}

impl From<GroupStatusDb> for GroupStatus {
    fn from(db: GroupStatusDb) -> Self {
        match db {
            GroupStatusDb::Open => GroupStatus::Open,
            GroupStatusDb::Closed => GroupStatus::Closed,
            GroupStatusDb::Locked => GroupStatus::Locked,
            GroupStatusDb::Started => GroupStatus::Started,
        }
    }
}

impl From<GroupStatus> for GroupStatusDb {
    fn from(status: GroupStatus) -> Self {
        match status {
            GroupStatus::Open => GroupStatusDb::Open,
            GroupStatus::Closed => GroupStatusDb::Closed,
            GroupStatus::Locked => GroupStatusDb::Locked,
            GroupStatus::Started => GroupStatusDb::Started,
        }
    }
}

/// Database enum mapping for the `roster_kind` PostgreSQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "roster_kind", rename_all = "lowercase")]
pub enum RosterKindDb {
    Invite,
    Request,
    Member,
}

impl From<RosterKindDb> for RosterKind {
    fn from(db: RosterKindDb) -> Self {
        match db {
            RosterKindDb::Invite => RosterKind::Invite,
            RosterKindDb::Request => RosterKind::Request,
            RosterKindDb::Member => RosterKind::Member,
        }
    }
}

impl From<RosterKind> for RosterKindDb {
    fn from(kind: RosterKind) -> Self {
        match kind {
            RosterKind::Invite => RosterKindDb::Invite,
            RosterKind::Request => RosterKindDb::Request,
            RosterKind::Member => RosterKindDb::Member,
        }
    }
}

/// Database enum mapping for the `roster_status` PostgreSQL type.
///
/// `pending` applies to invite/request rows; `not_ready`/`ready` apply to
/// member rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "roster_status", rename_all = "snake_case")]
pub enum RosterStatusDb {
    Pending,
    NotReady,
    Ready,
}

impl From<MemberStatus> for RosterStatusDb {
    fn from(status: MemberStatus) -> Self {
        match status {
            MemberStatus::NotReady => RosterStatusDb::NotReady,
            MemberStatus::Ready => RosterStatusDb::Ready,
        }
    }
}

impl RosterStatusDb {
    /// Interprets a member row's status. `pending` never appears on
    /// member rows; treat it defensively as not ready.
    pub fn as_member_status(self) -> MemberStatus {
        match self {
            RosterStatusDb::Ready => MemberStatus::Ready,
            RosterStatusDb::NotReady | RosterStatusDb::Pending => MemberStatus::NotReady,
        }
    }
}

/// Database row mapping for the groups table.
#[derive(Debug, Clone, FromRow)]
pub struct GroupEntity {
    pub id: Uuid,
    pub name: String,
    pub admin_id: Uuid,
    pub status: GroupStatusDb,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<GroupEntity> for Group {
    fn from(entity: GroupEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            admin_id: entity.admin_id,
            status: entity.status.into(),
            version: entity.version,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Database row mapping for a group_roster row.
#[derive(Debug, Clone, FromRow)]
pub struct RosterEntryEntity {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub ride_id: Uuid,
    pub kind: RosterKindDb,
    pub status: RosterStatusDb,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Roster row joined with the subject's public profile.
#[derive(Debug, Clone, FromRow)]
pub struct RosterEntryWithUserEntity {
    pub user_id: Uuid,
    pub ride_id: Uuid,
    pub kind: RosterKindDb,
    pub status: RosterStatusDb,
    pub display_name: String,
    pub contact_number: Option<String>,
    pub avatar_url: Option<String>,
    pub gender: GenderDb,
}

impl RosterEntryWithUserEntity {
    pub fn profile(&self) -> PublicUserProfile {
        PublicUserProfile {
            id: self.user_id,
            display_name: self.display_name.clone(),
            contact_number: self.contact_number.clone(),
            avatar_url: self.avatar_url.clone(),
            gender: self.gender.into(),
        }
    }
}

/// A group joined with the current user's pending invite row.
#[derive(Debug, Clone, FromRow)]
pub struct PendingInviteEntity {
    pub id: Uuid,
    pub name: String,
    pub admin_id: Uuid,
    pub status: GroupStatusDb,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ride_id: Uuid,
}
