//! Ride repository for database operations.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{GenderDb, GenderPreferenceDb, MatchCandidateEntity, RideEntity, RideStatusDb};
use crate::metrics::QueryTimer;

const RIDE_COLUMNS: &str = "id, owner_id, source, source_lon, source_lat, destination, \
     destination_lon, destination_lat, departs_at, gender_preference, status, created_at, updated_at";

/// Repository for ride-related database operations.
#[derive(Clone)]
pub struct RideRepository {
    pool: PgPool,
}

impl RideRepository {
    /// Creates a new RideRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new ride request.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_ride(
        &self,
        owner_id: Uuid,
        source: &str,
        source_lon: f64,
        source_lat: f64,
        destination: &str,
        destination_lon: f64,
        destination_lat: f64,
        departs_at: DateTime<Utc>,
        gender_preference: GenderPreferenceDb,
    ) -> Result<RideEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_ride");
        let result = sqlx::query_as::<_, RideEntity>(&format!(
            r#"
            INSERT INTO rides (owner_id, source, source_lon, source_lat, destination,
                               destination_lon, destination_lat, departs_at, gender_preference)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {RIDE_COLUMNS}
            "#,
        ))
        .bind(owner_id)
        .bind(source)
        .bind(source_lon)
        .bind(source_lat)
        .bind(destination)
        .bind(destination_lon)
        .bind(destination_lat)
        .bind(departs_at)
        .bind(gender_preference)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find ride by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<RideEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_ride_by_id");
        let result = sqlx::query_as::<_, RideEntity>(&format!(
            r#"
            SELECT {RIDE_COLUMNS}
            FROM rides
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// List a user's rides, earliest departure first.
    pub async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<RideEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_rides_by_owner");
        let result = sqlx::query_as::<_, RideEntity>(&format!(
            r#"
            SELECT {RIDE_COLUMNS}
            FROM rides
            WHERE owner_id = $1
            ORDER BY departs_at ASC
            "#,
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Delete a ride owned by the given user. Returns rows affected.
    pub async fn delete_ride(&self, id: Uuid, owner_id: Uuid) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("delete_ride");
        let result = sqlx::query(
            r#"
            DELETE FROM rides
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Update the departure time of a ride owned by the given user.
    pub async fn update_departure_time(
        &self,
        id: Uuid,
        owner_id: Uuid,
        departs_at: DateTime<Utc>,
    ) -> Result<Option<RideEntity>, sqlx::Error> {
        let timer = QueryTimer::new("update_ride_departure_time");
        let result = sqlx::query_as::<_, RideEntity>(&format!(
            r#"
            UPDATE rides
            SET departs_at = $3, updated_at = NOW()
            WHERE id = $1 AND owner_id = $2
            RETURNING {RIDE_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(owner_id)
        .bind(departs_at)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Update the status of a ride owned by the given user.
    pub async fn update_status(
        &self,
        id: Uuid,
        owner_id: Uuid,
        status: RideStatusDb,
    ) -> Result<Option<RideEntity>, sqlx::Error> {
        let timer = QueryTimer::new("update_ride_status");
        let result = sqlx::query_as::<_, RideEntity>(&format!(
            r#"
            UPDATE rides
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND owner_id = $2
            RETURNING {RIDE_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(owner_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Set the status of a batch of rides. Used by group lifecycle
    /// transitions that mark every member's ride at once.
    pub async fn set_status_for_rides(
        &self,
        ids: &[Uuid],
        status: RideStatusDb,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("set_status_for_rides");
        let result = sqlx::query(
            r#"
            UPDATE rides
            SET status = $2, updated_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(status)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Find candidate rides matching the given ride, nearest source first.
    ///
    /// A candidate must be pending, belong to a different owner, depart
    /// within the window, and have its source within `max_distance_meters`
    /// of the requesting ride's source. Gender constraints apply in both
    /// directions. When `strict_destination` is set, destinations must be
    /// within range of each other as well. `earth_box` prunes via the GiST
    /// index before the exact `earth_distance` filter.
    #[allow(clippy::too_many_arguments)]
    pub async fn find_matches(
        &self,
        requester_id: Uuid,
        source_lon: f64,
        source_lat: f64,
        destination_lon: f64,
        destination_lat: f64,
        departs_at: DateTime<Utc>,
        requester_gender: GenderDb,
        requester_preference: GenderPreferenceDb,
        strict_destination: bool,
        window_minutes: i64,
        max_distance_meters: f64,
    ) -> Result<Vec<MatchCandidateEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_ride_matches");
        let window_start = departs_at - Duration::minutes(window_minutes);
        let window_end = departs_at + Duration::minutes(window_minutes);
        let result = sqlx::query_as::<_, MatchCandidateEntity>(
            r#"
            SELECT
                r.id, r.owner_id, r.source, r.source_lon, r.source_lat,
                r.destination, r.destination_lon, r.destination_lat,
                r.departs_at, r.gender_preference, r.status, r.created_at, r.updated_at,
                earth_distance(ll_to_earth(r.source_lat, r.source_lon),
                               ll_to_earth($2, $1)) AS source_distance_meters,
                u.display_name AS owner_display_name,
                u.contact_number AS owner_contact_number,
                u.avatar_url AS owner_avatar_url,
                u.gender AS owner_gender
            FROM rides r
            JOIN users u ON r.owner_id = u.id
            WHERE r.status = 'pending'
              AND r.owner_id <> $5
              AND r.departs_at BETWEEN $6 AND $7
              AND earth_box(ll_to_earth($2, $1), $8) @> ll_to_earth(r.source_lat, r.source_lon)
              AND earth_distance(ll_to_earth(r.source_lat, r.source_lon),
                                 ll_to_earth($2, $1)) <= $8
              AND (r.gender_preference = 'any' OR r.gender_preference::text = $9::text)
              AND ($10 = 'any' OR u.gender::text = $10::text)
              AND ($11 = false OR (
                    earth_box(ll_to_earth($4, $3), $8) @> ll_to_earth(r.destination_lat, r.destination_lon)
                    AND earth_distance(ll_to_earth(r.destination_lat, r.destination_lon),
                                       ll_to_earth($4, $3)) <= $8))
            ORDER BY source_distance_meters ASC
            "#,
        )
        .bind(source_lon)
        .bind(source_lat)
        .bind(destination_lon)
        .bind(destination_lat)
        .bind(requester_id)
        .bind(window_start)
        .bind(window_end)
        .bind(max_distance_meters)
        .bind(requester_gender)
        .bind(requester_preference)
        .bind(strict_destination)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}

#[cfg(test)]
mod tests {
    // Note: RideRepository tests require a database connection and are covered by integration tests
}
