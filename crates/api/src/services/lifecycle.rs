//! Group lifecycle service.
//!
//! Owns every group mutation. Concurrency discipline is applied twice:
//! a per-group async lock serializes in-flight mutations on the same
//! group, and status transitions additionally compare-and-swap on the
//! group's version counter so a stale writer loses instead of clobbering.

use std::collections::HashMap;
use std::sync::Arc;

use domain::models::group::{
    default_group_name, plan_accept_invite, plan_accept_request, plan_invite, plan_join_request,
    CreateGroupRequest, Group, GroupStatus, GroupView, InviteSpec, JoinPlan, MemberEntryView,
    MemberStatus, PendingInviteView, RosterEntryView, RosterError, RosterKind,
};
use persistence::entities::{GroupEntity, RosterKindDb};
use persistence::repositories::{GroupRepository, RideRepository, UserRepository};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

/// Error type for group lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    /// The operation is not legal in the group's current status.
    #[error("{0}")]
    State(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

type Result<T> = std::result::Result<T, LifecycleError>;

/// Group lifecycle state machine over the group and roster repositories.
pub struct GroupLifecycle {
    groups: GroupRepository,
    rides: RideRepository,
    users: UserRepository,
    /// One async mutex per group with an in-flight mutation.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl GroupLifecycle {
    pub fn new(pool: PgPool) -> Self {
        Self {
            groups: GroupRepository::new(pool.clone()),
            rides: RideRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the per-group mutation lock. Cross-group operations
    /// proceed in parallel.
    async fn lock(&self, group_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(group_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Drops the lock entry for a group that no longer exists or can no
    /// longer be mutated.
    async fn retire_lock(&self, group_id: Uuid) {
        self.locks.lock().await.remove(&group_id);
    }

    async fn load(&self, group_id: Uuid) -> Result<Group> {
        let entity = self
            .groups
            .find_by_id(group_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound("Group not found".into()))?;
        Ok(entity.into())
    }

    fn roster_error(err: RosterError) -> LifecycleError {
        match err {
            RosterError::AlreadyMember
            | RosterError::AlreadyInvited
            | RosterError::RequestPending => LifecycleError::Conflict(err.to_string()),
            RosterError::NotAdmitting => LifecycleError::State(err.to_string()),
            RosterError::NoPendingInvite | RosterError::NoPendingRequest => {
                LifecycleError::NotFound(err.to_string())
            }
        }
    }

    /// The subject's current roster entry kind, if any.
    async fn entry_kind(&self, group_id: Uuid, user_id: Uuid) -> Result<Option<RosterKind>> {
        Ok(self
            .groups
            .get_entry(group_id, user_id)
            .await?
            .map(|e| RosterKind::from(e.kind)))
    }

    fn require_admin(group: &Group, user_id: Uuid) -> Result<()> {
        if group.admin_id != user_id {
            return Err(LifecycleError::Forbidden(
                "Only the group admin may do this".into(),
            ));
        }
        Ok(())
    }

    /// Verifies that `user_id` owns `ride_id` and the ride exists.
    async fn require_ride_owner(&self, user_id: Uuid, ride_id: Uuid) -> Result<()> {
        let ride = self
            .rides
            .find_by_id(ride_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound("Ride not found".into()))?;
        if ride.owner_id != user_id {
            return Err(LifecycleError::Validation(
                "Ride does not belong to the given user".into(),
            ));
        }
        Ok(())
    }

    /// Assembles the full view of a group: record plus its invite,
    /// request, and member sub-collections.
    pub async fn group_view(&self, group: &Group) -> Result<GroupView> {
        let roster = self.groups.load_roster(group.id).await?;

        let mut invites = Vec::new();
        let mut requests = Vec::new();
        let mut members = Vec::new();
        for entry in &roster {
            match RosterKind::from(entry.kind) {
                RosterKind::Invite => invites.push(RosterEntryView {
                    user: entry.profile(),
                    ride_id: entry.ride_id,
                }),
                RosterKind::Request => requests.push(RosterEntryView {
                    user: entry.profile(),
                    ride_id: entry.ride_id,
                }),
                RosterKind::Member => members.push(MemberEntryView {
                    user: entry.profile(),
                    ride_id: entry.ride_id,
                    status: entry.status.as_member_status(),
                }),
            }
        }

        Ok(GroupView {
            id: group.id,
            name: group.name.clone(),
            admin_id: group.admin_id,
            status: group.status,
            invites,
            requests,
            members,
            created_at: group.created_at,
            updated_at: group.updated_at,
        })
    }

    pub async fn get_group(&self, group_id: Uuid) -> Result<GroupView> {
        let group = self.load(group_id).await?;
        self.group_view(&group).await
    }

    /// Creates a group with the caller as admin and first member, plus an
    /// initial batch of invites. Each invited (user, ride) pair must be a
    /// real user owning that ride.
    pub async fn create_group(&self, admin_id: Uuid, req: CreateGroupRequest) -> Result<GroupView> {
        let admin = self
            .users
            .find_profile(admin_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound("User not found".into()))?;

        self.require_ride_owner(admin_id, req.ride).await?;
        if self.groups.find_group_for_ride(req.ride).await?.is_some() {
            return Err(LifecycleError::Conflict(
                "Ride is already committed to a group".into(),
            ));
        }

        for InviteSpec { user, ride } in &req.invites {
            if *user == admin_id {
                return Err(LifecycleError::Validation(
                    "Cannot invite the group admin".into(),
                ));
            }
            self.users
                .find_profile(*user)
                .await?
                .ok_or_else(|| LifecycleError::Validation("Invited user does not exist".into()))?;
            self.require_ride_owner(*user, *ride).await?;
        }

        let name = match req.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => default_group_name(&admin.display_name),
        };

        let invite_pairs: Vec<(Uuid, Uuid)> =
            req.invites.iter().map(|i| (i.user, i.ride)).collect();
        let entity = self
            .groups
            .create_group(&name, admin_id, req.ride, &invite_pairs)
            .await?;

        info!(group_id = %entity.id, admin_id = %admin_id, "Group created");
        let group: Group = entity.into();
        self.group_view(&group).await
    }

    /// Deletes a group. Admin only.
    pub async fn delete_group(&self, user_id: Uuid, group_id: Uuid) -> Result<()> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        Self::require_admin(&group, user_id)?;

        self.groups.delete_group(group_id).await?;
        self.retire_lock(group_id).await;
        info!(group_id = %group_id, "Group deleted");
        Ok(())
    }

    /// Closes an open group, freezing membership and entering the
    /// readiness phase. Pending invites and requests are left in place
    /// but no admission path will honor them afterwards. Member rides are
    /// marked matched.
    pub async fn close_group(&self, user_id: Uuid, group_id: Uuid) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        Self::require_admin(&group, user_id)?;
        if group.status != GroupStatus::Open {
            return Err(LifecycleError::State(format!(
                "Group cannot be closed while {}",
                group.status
            )));
        }

        let updated = self
            .groups
            .update_status_cas(group_id, group.version, GroupStatus::Closed.into())
            .await?
            .ok_or_else(|| LifecycleError::Conflict("Group was modified concurrently".into()))?;

        let member_rides: Vec<Uuid> = self
            .groups
            .load_roster(group_id)
            .await?
            .iter()
            .filter(|e| RosterKind::from(e.kind) == RosterKind::Member)
            .map(|e| e.ride_id)
            .collect();
        self.rides
            .set_status_for_rides(&member_rides, domain::models::ride::RideStatus::Matched.into())
            .await?;

        info!(group_id = %group_id, "Group closed");
        let group: Group = updated.into();
        self.group_view(&group).await
    }

    /// Invites a user into an open group. Admin only. A user already on
    /// the roster in any capacity cannot be invited again.
    pub async fn invite_user(
        &self,
        admin_id: Uuid,
        group_id: Uuid,
        user: Uuid,
        ride: Uuid,
    ) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        Self::require_admin(&group, admin_id)?;
        if user == admin_id {
            return Err(LifecycleError::Validation(
                "Cannot invite the group admin".into(),
            ));
        }
        let existing = self.entry_kind(group_id, user).await?;
        plan_invite(group.status, existing).map_err(Self::roster_error)?;
        self.users
            .find_profile(user)
            .await?
            .ok_or_else(|| LifecycleError::NotFound("Invited user does not exist".into()))?;
        self.require_ride_owner(user, ride).await?;

        self.groups.add_invite(group_id, user, ride).await?;
        self.refresh_view(group_id).await
    }

    /// Accepts the caller's pending invite, promoting it to membership.
    /// Accepting twice is a conflict, not a missing invite.
    pub async fn accept_invite(&self, user_id: Uuid, group_id: Uuid) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;

        let existing = self.entry_kind(group_id, user_id).await?;
        plan_accept_invite(group.status, existing).map_err(Self::roster_error)?;

        let promoted = self
            .groups
            .promote_entry(group_id, user_id, RosterKindDb::Invite)
            .await?;
        if promoted == 0 {
            return Err(LifecycleError::Conflict(
                "Group was modified concurrently".into(),
            ));
        }
        self.refresh_view(group_id).await
    }

    /// Rejects the caller's pending invite.
    pub async fn reject_invite(&self, user_id: Uuid, group_id: Uuid) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        self.load(group_id).await?;

        let removed = self
            .groups
            .remove_entry(group_id, user_id, RosterKindDb::Invite)
            .await?;
        if removed == 0 {
            return Err(LifecycleError::NotFound("No pending invite".into()));
        }
        self.refresh_view(group_id).await
    }

    /// Asks to join a group. If the caller already holds a pending invite
    /// this converges to accepting it; an existing membership or request
    /// is a conflict, as is a group that no longer admits anyone.
    pub async fn request_join(
        &self,
        user_id: Uuid,
        group_id: Uuid,
        ride: Uuid,
    ) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;

        let existing = self.entry_kind(group_id, user_id).await?;
        match plan_join_request(group.status, existing) {
            Ok(JoinPlan::PromoteInvite) => {
                self.groups
                    .promote_entry(group_id, user_id, RosterKindDb::Invite)
                    .await?;
            }
            Ok(JoinPlan::FileRequest) => {
                self.require_ride_owner(user_id, ride).await?;
                self.groups.add_request(group_id, user_id, ride).await?;
            }
            // Joining a frozen roster is a conflict to the caller, not a
            // state error on the group.
            Err(RosterError::NotAdmitting) => {
                return Err(LifecycleError::Conflict(
                    RosterError::NotAdmitting.to_string(),
                ));
            }
            Err(e) => return Err(Self::roster_error(e)),
        }
        self.refresh_view(group_id).await
    }

    /// Approves a pending join request. Admin only.
    pub async fn accept_join_request(
        &self,
        admin_id: Uuid,
        group_id: Uuid,
        user: Uuid,
    ) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        Self::require_admin(&group, admin_id)?;

        let existing = self.entry_kind(group_id, user).await?;
        plan_accept_request(group.status, existing).map_err(Self::roster_error)?;

        let promoted = self
            .groups
            .promote_entry(group_id, user, RosterKindDb::Request)
            .await?;
        if promoted == 0 {
            return Err(LifecycleError::Conflict(
                "Group was modified concurrently".into(),
            ));
        }
        self.refresh_view(group_id).await
    }

    /// Rejects a pending join request. Admin only.
    pub async fn reject_join_request(
        &self,
        admin_id: Uuid,
        group_id: Uuid,
        user: Uuid,
    ) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        Self::require_admin(&group, admin_id)?;

        let removed = self
            .groups
            .remove_entry(group_id, user, RosterKindDb::Request)
            .await?;
        if removed == 0 {
            return Err(LifecycleError::NotFound("No pending join request".into()));
        }
        self.refresh_view(group_id).await
    }

    /// Removes a member. Admin only; the admin cannot remove themselves.
    pub async fn remove_member(
        &self,
        admin_id: Uuid,
        group_id: Uuid,
        user: Uuid,
    ) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        Self::require_admin(&group, admin_id)?;
        if user == group.admin_id {
            return Err(LifecycleError::Validation(
                "The admin cannot be removed from their own group".into(),
            ));
        }

        let removed = self
            .groups
            .remove_entry(group_id, user, RosterKindDb::Member)
            .await?;
        if removed == 0 {
            return Err(LifecycleError::NotFound("User is not a member".into()));
        }
        self.refresh_view(group_id).await
    }

    /// Leaves a group. The admin cannot leave; they delete the group.
    pub async fn leave_group(&self, user_id: Uuid, group_id: Uuid) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        if user_id == group.admin_id {
            return Err(LifecycleError::Validation(
                "The admin must delete the group instead of leaving it".into(),
            ));
        }

        let removed = self
            .groups
            .remove_entry(group_id, user_id, RosterKindDb::Member)
            .await?;
        if removed == 0 {
            return Err(LifecycleError::NotFound("Not a member of this group".into()));
        }
        self.refresh_view(group_id).await
    }

    /// Administrative write of a member's readiness status.
    pub async fn set_member_status(
        &self,
        admin_id: Uuid,
        group_id: Uuid,
        user: Uuid,
        status: MemberStatus,
    ) -> Result<GroupView> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        Self::require_admin(&group, admin_id)?;

        let updated = self
            .groups
            .set_member_status(group_id, user, status.into())
            .await?;
        if updated == 0 {
            return Err(LifecycleError::NotFound("User is not a member".into()));
        }
        self.refresh_view(group_id).await
    }

    /// Explicit admin-triggered ride start.
    pub async fn start_ride(&self, user_id: Uuid, group_id: Uuid) -> Result<()> {
        {
            let group = self.load(group_id).await?;
            Self::require_admin(&group, user_id)?;
        }
        self.record_ride_started(group_id).await
    }

    /// Terminal transition into `started`. Invoked by the admin's explicit
    /// start or by the readiness countdown expiring; the version CAS
    /// guarantees exactly one caller wins.
    pub async fn record_ride_started(&self, group_id: Uuid) -> Result<()> {
        let _guard = self.lock(group_id).await;
        let group = self.load(group_id).await?;
        if !group.status.can_start() {
            return Err(LifecycleError::State(format!(
                "Ride cannot start while the group is {}",
                group.status
            )));
        }

        self.groups
            .update_status_cas(group_id, group.version, GroupStatus::Started.into())
            .await?
            .ok_or_else(|| LifecycleError::Conflict("Group was modified concurrently".into()))?;

        self.retire_lock(group_id).await;
        info!(group_id = %group_id, "Ride started");
        Ok(())
    }

    /// Verifies membership and returns the group. Used by the channel and
    /// the message history endpoint.
    pub async fn require_member(&self, group_id: Uuid, user_id: Uuid) -> Result<Group> {
        let group = self.load(group_id).await?;
        let entry = self.groups.get_entry(group_id, user_id).await?;
        match entry {
            Some(e) if RosterKind::from(e.kind) == RosterKind::Member => Ok(group),
            _ => Err(LifecycleError::Forbidden(
                "Not a member of this group".into(),
            )),
        }
    }

    /// IDs of the group's current members.
    pub async fn member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
        let roster = self.groups.load_roster(group_id).await?;
        Ok(roster
            .iter()
            .filter(|e| RosterKind::from(e.kind) == RosterKind::Member)
            .map(|e| e.user_id)
            .collect())
    }

    /// Groups the user is a member of.
    pub async fn groups_for_member(&self, user_id: Uuid) -> Result<Vec<Group>> {
        let entities = self.groups.list_groups_for_member(user_id).await?;
        Ok(entities.into_iter().map(GroupEntity::into).collect())
    }

    /// The user's pending invites.
    pub async fn pending_invites(&self, user_id: Uuid) -> Result<Vec<PendingInviteView>> {
        let entities = self.groups.list_pending_invites(user_id).await?;
        Ok(entities
            .into_iter()
            .map(|e| PendingInviteView {
                ride_id: e.ride_id,
                group: Group {
                    id: e.id,
                    name: e.name,
                    admin_id: e.admin_id,
                    status: e.status.into(),
                    version: e.version,
                    created_at: e.created_at,
                    updated_at: e.updated_at,
                },
            })
            .collect())
    }

    /// The group (if any) a ride is committed to as a member ride.
    pub async fn group_for_ride(&self, ride_id: Uuid) -> Result<Option<Group>> {
        Ok(self
            .groups
            .find_group_for_ride(ride_id)
            .await?
            .map(GroupEntity::into))
    }

    async fn refresh_view(&self, group_id: Uuid) -> Result<GroupView> {
        let group = self.load(group_id).await?;
        self.group_view(&group).await
    }
}

#[cfg(test)]
mod tests {
    // Note: GroupLifecycle tests require a database connection and are covered by integration tests.
    // The pure state rules it enforces (status gates, admin checks) are unit tested in
    // domain::models::group.
}
