//! Group repository for database operations.
//!
//! Every roster mutation runs in a transaction that also bumps the group's
//! version counter, so concurrent status transitions (which compare-and-swap
//! on the version) observe membership churn.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::entities::{
    GroupEntity, GroupStatusDb, PendingInviteEntity, RosterEntryEntity, RosterEntryWithUserEntity,
    RosterKindDb, RosterStatusDb,
};
use crate::metrics::QueryTimer;

const GROUP_COLUMNS: &str = "id, name, admin_id, status, version, created_at, updated_at";

const ROSTER_COLUMNS: &str = "id, group_id, user_id, ride_id, kind, status, created_at, updated_at";

/// Repository for group and roster database operations.
#[derive(Clone)]
pub struct GroupRepository {
    pool: PgPool,
}

impl GroupRepository {
    /// Creates a new GroupRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a group with its admin as the first member and an initial
    /// batch of invites, atomically.
    pub async fn create_group(
        &self,
        name: &str,
        admin_id: Uuid,
        admin_ride_id: Uuid,
        invites: &[(Uuid, Uuid)],
    ) -> Result<GroupEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_group");
        let mut tx = self.pool.begin().await?;

        let group = sqlx::query_as::<_, GroupEntity>(&format!(
            r#"
            INSERT INTO groups (name, admin_id)
            VALUES ($1, $2)
            RETURNING {GROUP_COLUMNS}
            "#,
        ))
        .bind(name)
        .bind(admin_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO group_roster (group_id, user_id, ride_id, kind, status)
            VALUES ($1, $2, $3, 'member', 'not_ready')
            "#,
        )
        .bind(group.id)
        .bind(admin_id)
        .bind(admin_ride_id)
        .execute(&mut *tx)
        .await?;

        for (user_id, ride_id) in invites {
            sqlx::query(
                r#"
                INSERT INTO group_roster (group_id, user_id, ride_id, kind, status)
                VALUES ($1, $2, $3, 'invite', 'pending')
                "#,
            )
            .bind(group.id)
            .bind(user_id)
            .bind(ride_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        timer.record();
        Ok(group)
    }

    /// Find group by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<GroupEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_group_by_id");
        let result = sqlx::query_as::<_, GroupEntity>(&format!(
            r#"
            SELECT {GROUP_COLUMNS}
            FROM groups
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Delete a group. Roster rows and messages cascade.
    pub async fn delete_group(&self, id: Uuid) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("delete_group");
        let result = sqlx::query(
            r#"
            DELETE FROM groups
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Load the full roster of a group with each subject's public profile.
    pub async fn load_roster(
        &self,
        group_id: Uuid,
    ) -> Result<Vec<RosterEntryWithUserEntity>, sqlx::Error> {
        let timer = QueryTimer::new("load_group_roster");
        let result = sqlx::query_as::<_, RosterEntryWithUserEntity>(
            r#"
            SELECT
                e.user_id, e.ride_id, e.kind, e.status,
                u.display_name, u.contact_number, u.avatar_url, u.gender
            FROM group_roster e
            JOIN users u ON e.user_id = u.id
            WHERE e.group_id = $1
            ORDER BY e.created_at ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a user's roster entry in a group, whatever its kind.
    pub async fn get_entry(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<RosterEntryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("get_roster_entry");
        let result = sqlx::query_as::<_, RosterEntryEntity>(&format!(
            r#"
            SELECT {ROSTER_COLUMNS}
            FROM group_roster
            WHERE group_id = $1 AND user_id = $2
            "#,
        ))
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Add a pending invite for a user. Fails with a unique violation if
    /// the user already holds a roster row in this group.
    pub async fn add_invite(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        ride_id: Uuid,
    ) -> Result<RosterEntryEntity, sqlx::Error> {
        self.add_pending_entry("add_group_invite", group_id, user_id, ride_id, RosterKindDb::Invite)
            .await
    }

    /// Add a pending join request for a user. Fails with a unique violation
    /// if the user already holds a roster row in this group.
    pub async fn add_request(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        ride_id: Uuid,
    ) -> Result<RosterEntryEntity, sqlx::Error> {
        self.add_pending_entry("add_group_request", group_id, user_id, ride_id, RosterKindDb::Request)
            .await
    }

    async fn add_pending_entry(
        &self,
        query_name: &str,
        group_id: Uuid,
        user_id: Uuid,
        ride_id: Uuid,
        kind: RosterKindDb,
    ) -> Result<RosterEntryEntity, sqlx::Error> {
        let timer = QueryTimer::new(query_name.to_string());
        let mut tx = self.pool.begin().await?;

        let entry = sqlx::query_as::<_, RosterEntryEntity>(&format!(
            r#"
            INSERT INTO group_roster (group_id, user_id, ride_id, kind, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING {ROSTER_COLUMNS}
            "#,
        ))
        .bind(group_id)
        .bind(user_id)
        .bind(ride_id)
        .bind(kind)
        .fetch_one(&mut *tx)
        .await?;

        Self::touch(&mut tx, group_id).await?;
        tx.commit().await?;
        timer.record();
        Ok(entry)
    }

    /// Remove a user's roster entry of the given kind. Returns rows affected.
    pub async fn remove_entry(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        kind: RosterKindDb,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("remove_roster_entry");
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            DELETE FROM group_roster
            WHERE group_id = $1 AND user_id = $2 AND kind = $3
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(kind)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            Self::touch(&mut tx, group_id).await?;
        }
        tx.commit().await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Promote a pending invite or request to full membership. Returns
    /// rows affected; zero means no pending entry of that kind existed.
    pub async fn promote_entry(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        from_kind: RosterKindDb,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("promote_roster_entry");
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE group_roster
            SET kind = 'member', status = 'not_ready', updated_at = NOW()
            WHERE group_id = $1 AND user_id = $2 AND kind = $3
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(from_kind)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            Self::touch(&mut tx, group_id).await?;
        }
        tx.commit().await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Set a member's readiness status. Returns rows affected; zero means
    /// the user is not a member of the group.
    pub async fn set_member_status(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        status: RosterStatusDb,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("set_member_status");
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE group_roster
            SET status = $3, updated_at = NOW()
            WHERE group_id = $1 AND user_id = $2 AND kind = 'member'
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(status)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            Self::touch(&mut tx, group_id).await?;
        }
        tx.commit().await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Transition a group's status if and only if its version still matches.
    /// Returns the updated group, or None when the version moved underneath
    /// the caller.
    pub async fn update_status_cas(
        &self,
        group_id: Uuid,
        expected_version: i32,
        new_status: GroupStatusDb,
    ) -> Result<Option<GroupEntity>, sqlx::Error> {
        let timer = QueryTimer::new("update_group_status_cas");
        let result = sqlx::query_as::<_, GroupEntity>(&format!(
            r#"
            UPDATE groups
            SET status = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {GROUP_COLUMNS}
            "#,
        ))
        .bind(group_id)
        .bind(expected_version)
        .bind(new_status)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// List the groups a user belongs to as a member.
    pub async fn list_groups_for_member(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<GroupEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_groups_for_member");
        let result = sqlx::query_as::<_, GroupEntity>(
            r#"
            SELECT g.id, g.name, g.admin_id, g.status, g.version, g.created_at, g.updated_at
            FROM groups g
            JOIN group_roster e ON e.group_id = g.id
            WHERE e.user_id = $1 AND e.kind = 'member'
            ORDER BY g.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// List the groups holding a pending invite for a user.
    pub async fn list_pending_invites(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PendingInviteEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_pending_invites");
        let result = sqlx::query_as::<_, PendingInviteEntity>(
            r#"
            SELECT g.id, g.name, g.admin_id, g.status, g.version, g.created_at, g.updated_at,
                   e.ride_id
            FROM groups g
            JOIN group_roster e ON e.group_id = g.id
            WHERE e.user_id = $1 AND e.kind = 'invite'
            ORDER BY e.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find the group a ride is committed to as a member ride, if any.
    pub async fn find_group_for_ride(
        &self,
        ride_id: Uuid,
    ) -> Result<Option<GroupEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_group_for_ride");
        let result = sqlx::query_as::<_, GroupEntity>(
            r#"
            SELECT g.id, g.name, g.admin_id, g.status, g.version, g.created_at, g.updated_at
            FROM groups g
            JOIN group_roster e ON e.group_id = g.id
            WHERE e.ride_id = $1 AND e.kind = 'member'
            LIMIT 1
            "#,
        )
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Bump the group's version inside the caller's transaction so
    /// concurrent compare-and-swap transitions see the roster change.
    async fn touch(
        tx: &mut Transaction<'_, Postgres>,
        group_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE groups
            SET version = version + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Note: GroupRepository tests require a database connection and are covered by integration tests
}
