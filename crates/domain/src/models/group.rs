//! Group domain models for ride coordination groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::user::PublicUserProfile;

/// Lifecycle status of a group.
///
/// `open` accepts invites and join requests, `closed` freezes membership
/// and activates the readiness phase, `started` is the terminal
/// ride-started condition. `locked` is a reserved administrative state
/// with no normal transition into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Open,
    Closed,
    Locked,
    Started,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Open => "open",
            GroupStatus::Closed => "closed",
            GroupStatus::Locked => "locked",
            GroupStatus::Started => "started",
        }
    }

    /// Returns true if the group still admits invites and join requests.
    pub fn accepts_admissions(&self) -> bool {
        matches!(self, GroupStatus::Open)
    }

    /// Returns true if members may toggle readiness.
    pub fn in_readiness_phase(&self) -> bool {
        matches!(self, GroupStatus::Closed)
    }

    /// Returns true if the ride-started transition is still permitted.
    pub fn can_start(&self) -> bool {
        matches!(self, GroupStatus::Open | GroupStatus::Closed)
    }
}

impl FromStr for GroupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(GroupStatus::Open),
            "closed" => Ok(GroupStatus::Closed),
            "locked" => Ok(GroupStatus::Locked),
            "started" => Ok(GroupStatus::Started),
            _ => Err(format!("Invalid group status: {}", s)),
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which sub-collection a roster row belongs to.
///
/// A user holds at most one roster row per group, which is what keeps the
/// invite/request/member sets pairwise disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterKind {
    Invite,
    Request,
    Member,
}

impl RosterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RosterKind::Invite => "invite",
            RosterKind::Request => "request",
            RosterKind::Member => "member",
        }
    }
}

impl fmt::Display for RosterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Readiness state of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    NotReady,
    Ready,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::NotReady => "not_ready",
            MemberStatus::Ready => "ready",
        }
    }
}

impl FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_ready" => Ok(MemberStatus::NotReady),
            "ready" => Ok(MemberStatus::Ready),
            _ => Err(format!("Invalid member status: {}", s)),
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ride coordination group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub admin_id: Uuid,
    pub status: GroupStatus,
    /// Optimistic concurrency counter, bumped on every mutation.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An invite or join-request entry with the subject's public profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RosterEntryView {
    pub user: PublicUserProfile,
    pub ride_id: Uuid,
}

/// A member entry with readiness status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MemberEntryView {
    pub user: PublicUserProfile,
    pub ride_id: Uuid,
    pub status: MemberStatus,
}

/// Full group view: the group record plus its three sub-collections.
/// Comparable so channel events carrying views can be compared whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct GroupView {
    pub id: Uuid,
    pub name: String,
    pub admin_id: Uuid,
    pub status: GroupStatus,
    pub invites: Vec<RosterEntryView>,
    pub requests: Vec<RosterEntryView>,
    pub members: Vec<MemberEntryView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One (user, ride) pair to invite at group creation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InviteSpec {
    pub user: Uuid,
    pub ride: Uuid,
}

/// Request payload for creating a group.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateGroupRequest {
    /// Defaults to "<admin display name>'s Group" when absent or blank.
    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    /// The admin's own ride, recorded on their member entry.
    pub ride: Uuid,

    #[serde(default)]
    pub invites: Vec<InviteSpec>,
}

/// Request payload for deleting a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeleteGroupRequest {
    pub group_id: Uuid,
}

/// Request payload for closing a group (open -> closed).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CloseGroupRequest {
    pub group_id: Uuid,
}

/// Request payload for inviting a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InviteUserRequest {
    pub group_id: Uuid,
    pub user: Uuid,
    pub ride: Uuid,
}

/// Request payload for accepting or rejecting one's own invite.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InviteActionRequest {
    pub group_id: Uuid,
}

/// Request payload for asking to join a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JoinRequestRequest {
    pub group_id: Uuid,
    pub ride: Uuid,
}

/// Request payload for the admin resolving a join request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JoinActionRequest {
    pub group_id: Uuid,
    pub user: Uuid,
}

/// Request payload for removing a member (admin).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemoveMemberRequest {
    pub group_id: Uuid,
    pub user: Uuid,
}

/// Request payload for leaving a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LeaveGroupRequest {
    pub group_id: Uuid,
}

/// Request payload for the administrative member-status write.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MemberStatusRequest {
    pub group_id: Uuid,
    pub user: Uuid,
    pub status: MemberStatus,
}

/// A pending invite of the current user, for the my-invites listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PendingInviteView {
    pub group: Group,
    pub ride_id: Uuid,
}

/// Builds the default group name from the admin's display name.
pub fn default_group_name(admin_display_name: &str) -> String {
    format!("{}'s Group", admin_display_name)
}

/// Planned effect of a join request against the caller's current entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPlan {
    /// The caller already holds a pending invite; joining converges to
    /// accepting it.
    PromoteInvite,
    /// No existing entry; file a new request for the admin to resolve.
    FileRequest,
}

/// Violation of the roster state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterError {
    AlreadyMember,
    AlreadyInvited,
    RequestPending,
    NotAdmitting,
    NoPendingInvite,
    NoPendingRequest,
}

impl fmt::Display for RosterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RosterError::AlreadyMember => "Already a member of this group",
            RosterError::AlreadyInvited => "User already holds a pending invite",
            RosterError::RequestPending => "Join request already pending",
            RosterError::NotAdmitting => "Group is no longer accepting members",
            RosterError::NoPendingInvite => "No pending invite",
            RosterError::NoPendingRequest => "No pending join request",
        };
        write!(f, "{}", msg)
    }
}

// Admission rules of the roster state machine. Each function takes the
// group's status and the subject's current entry kind; a user holds at
// most one entry per group, which keeps the invite, request, and member
// sub-collections pairwise disjoint.

/// May the admin invite a user holding `existing`?
pub fn plan_invite(
    status: GroupStatus,
    existing: Option<RosterKind>,
) -> Result<(), RosterError> {
    if !status.accepts_admissions() {
        return Err(RosterError::NotAdmitting);
    }
    match existing {
        None => Ok(()),
        Some(RosterKind::Member) => Err(RosterError::AlreadyMember),
        Some(RosterKind::Invite) => Err(RosterError::AlreadyInvited),
        Some(RosterKind::Request) => Err(RosterError::RequestPending),
    }
}

/// May the subject accept their invite? A second accept after the invite
/// was already promoted is a distinct violation from a missing invite.
pub fn plan_accept_invite(
    status: GroupStatus,
    existing: Option<RosterKind>,
) -> Result<(), RosterError> {
    match existing {
        Some(RosterKind::Member) => Err(RosterError::AlreadyMember),
        Some(RosterKind::Invite) if status.accepts_admissions() => Ok(()),
        Some(RosterKind::Invite) => Err(RosterError::NotAdmitting),
        _ => Err(RosterError::NoPendingInvite),
    }
}

/// What should a join request do, given the caller's current entry?
pub fn plan_join_request(
    status: GroupStatus,
    existing: Option<RosterKind>,
) -> Result<JoinPlan, RosterError> {
    match existing {
        Some(RosterKind::Member) => Err(RosterError::AlreadyMember),
        Some(RosterKind::Request) => Err(RosterError::RequestPending),
        Some(RosterKind::Invite) if status.accepts_admissions() => Ok(JoinPlan::PromoteInvite),
        None if status.accepts_admissions() => Ok(JoinPlan::FileRequest),
        _ => Err(RosterError::NotAdmitting),
    }
}

/// May the admin approve the subject's join request?
pub fn plan_accept_request(
    status: GroupStatus,
    existing: Option<RosterKind>,
) -> Result<(), RosterError> {
    match existing {
        Some(RosterKind::Member) => Err(RosterError::AlreadyMember),
        Some(RosterKind::Request) if status.accepts_admissions() => Ok(()),
        Some(RosterKind::Request) => Err(RosterError::NotAdmitting),
        _ => Err(RosterError::NoPendingRequest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_helpers() {
        assert!(GroupStatus::Open.accepts_admissions());
        assert!(!GroupStatus::Closed.accepts_admissions());
        assert!(GroupStatus::Closed.in_readiness_phase());
        assert!(!GroupStatus::Open.in_readiness_phase());
        assert!(GroupStatus::Open.can_start());
        assert!(GroupStatus::Closed.can_start());
        assert!(!GroupStatus::Started.can_start());
        assert!(!GroupStatus::Locked.can_start());
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["open", "closed", "locked", "started"] {
            assert_eq!(GroupStatus::from_str(s).unwrap().as_str(), s);
        }
        assert!(GroupStatus::from_str("archived").is_err());
    }

    #[test]
    fn test_member_status_round_trip() {
        assert_eq!(
            MemberStatus::from_str("not_ready").unwrap(),
            MemberStatus::NotReady
        );
        assert_eq!(MemberStatus::from_str("ready").unwrap(), MemberStatus::Ready);
        assert!(MemberStatus::from_str("almost").is_err());
    }

    #[test]
    fn test_default_group_name() {
        assert_eq!(default_group_name("Asha"), "Asha's Group");
    }

    #[test]
    fn test_invite_accept_round_trip() {
        // An empty slot in an open group admits an invite, the invite can
        // be accepted, and the resulting member blocks any further entry.
        assert_eq!(plan_invite(GroupStatus::Open, None), Ok(()));
        assert_eq!(
            plan_accept_invite(GroupStatus::Open, Some(RosterKind::Invite)),
            Ok(())
        );
        assert_eq!(
            plan_invite(GroupStatus::Open, Some(RosterKind::Member)),
            Err(RosterError::AlreadyMember)
        );
    }

    #[test]
    fn test_invite_reject_round_trip() {
        // Rejecting removes the entry, so a fresh invite is admissible.
        assert_eq!(plan_invite(GroupStatus::Open, None), Ok(()));
        assert_eq!(
            plan_accept_invite(GroupStatus::Open, None),
            Err(RosterError::NoPendingInvite)
        );
        assert_eq!(plan_invite(GroupStatus::Open, None), Ok(()));
    }

    #[test]
    fn test_double_accept_is_a_distinct_violation() {
        // Accepting twice finds a member entry, not a missing invite.
        assert_eq!(
            plan_accept_invite(GroupStatus::Open, Some(RosterKind::Member)),
            Err(RosterError::AlreadyMember)
        );
        assert_eq!(
            plan_accept_request(GroupStatus::Open, Some(RosterKind::Member)),
            Err(RosterError::AlreadyMember)
        );
    }

    #[test]
    fn test_single_entry_keeps_sub_collections_disjoint() {
        // Whatever entry a user holds, every second admission path is
        // rejected, so no user can appear in two sub-collections.
        assert_eq!(
            plan_invite(GroupStatus::Open, Some(RosterKind::Invite)),
            Err(RosterError::AlreadyInvited)
        );
        assert_eq!(
            plan_invite(GroupStatus::Open, Some(RosterKind::Request)),
            Err(RosterError::RequestPending)
        );
        assert_eq!(
            plan_join_request(GroupStatus::Open, Some(RosterKind::Request)),
            Err(RosterError::RequestPending)
        );
        assert_eq!(
            plan_join_request(GroupStatus::Open, Some(RosterKind::Member)),
            Err(RosterError::AlreadyMember)
        );
    }

    #[test]
    fn test_join_request_converges_on_pending_invite() {
        assert_eq!(
            plan_join_request(GroupStatus::Open, Some(RosterKind::Invite)),
            Ok(JoinPlan::PromoteInvite)
        );
        assert_eq!(
            plan_join_request(GroupStatus::Open, None),
            Ok(JoinPlan::FileRequest)
        );
    }

    #[test]
    fn test_closed_group_admits_nobody() {
        for status in [GroupStatus::Closed, GroupStatus::Locked, GroupStatus::Started] {
            assert_eq!(plan_invite(status, None), Err(RosterError::NotAdmitting));
            assert_eq!(
                plan_accept_invite(status, Some(RosterKind::Invite)),
                Err(RosterError::NotAdmitting)
            );
            assert_eq!(
                plan_join_request(status, None),
                Err(RosterError::NotAdmitting)
            );
            assert_eq!(
                plan_accept_request(status, Some(RosterKind::Request)),
                Err(RosterError::NotAdmitting)
            );
        }
    }
}
