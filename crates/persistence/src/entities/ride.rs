//! Ride entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::ride::{GenderPreference, GeoPoint, RideMatch, RideRequest, RideStatus};
use domain::models::user::PublicUserProfile;
use sqlx::FromRow;
use uuid::Uuid;

use super::user::GenderDb;

/// Database enum mapping for the `gender_preference` PostgreSQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "gender_preference", rename_all = "lowercase")]
pub enum GenderPreferenceDb {
    Any,
    Male,
    Female,
}

impl From<GenderPreferenceDb> for GenderPreference {
    fn from(db: GenderPreferenceDb) -> Self {
        match db {
            GenderPreferenceDb::Any => GenderPreference::Any,
            GenderPreferenceDb::Male => GenderPreference::Male,
            GenderPreferenceDb::Female => GenderPreference::Female,
        }
    }
}

impl From<GenderPreference> for GenderPreferenceDb {
    fn from(preference: GenderPreference) -> Self {
        match preference {
            GenderPreference::Any => GenderPreferenceDb::Any,
            GenderPreference::Male => GenderPreferenceDb::Male,
            GenderPreference::Female => GenderPreferenceDb::Female,
        }
    }
}

/// Database enum mapping for the `ride_status` PostgreSQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "ride_status", rename_all = "lowercase")]
pub enum RideStatusDb {
    Pending,
    Matched,
    Completed,
    Cancelled,
}

impl From<RideStatusDb> for RideStatus {
    fn from(db: RideStatusDb) -> Self {
        match db {
            RideStatusDb::Pending => RideStatus::Pending,
            RideStatusDb::Matched => RideStatus::Matched,
            RideStatusDb::Completed => RideStatus::Completed,
            RideStatusDb::Cancelled => RideStatus::Cancelled,
        }
    }
}

impl From<RideStatus> for RideStatusDb {
    fn from(status: RideStatus) -> Self {
        match status {
            RideStatus::Pending => RideStatusDb::Pending,
            RideStatus::Matched => RideStatusDb::Matched,
            RideStatus::Completed => RideStatusDb::Completed,
            RideStatus::Cancelled => RideStatusDb::Cancelled,
        }
    }
}

/// Database row mapping for the rides table.
#[derive(Debug, Clone, FromRow)]
pub struct RideEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub source: String,
    pub source_lon: f64,
    pub source_lat: f64,
    pub destination: String,
    pub destination_lon: f64,
    pub destination_lat: f64,
    pub departs_at: DateTime<Utc>,
    pub gender_preference: GenderPreferenceDb,
    pub status: RideStatusDb,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RideEntity> for RideRequest {
    fn from(entity: RideEntity) -> Self {
        Self {
            id: entity.id,
            owner_id: entity.owner_id,
            source: entity.source,
            source_point: GeoPoint::new(entity.source_lon, entity.source_lat),
            destination: entity.destination,
            destination_point: GeoPoint::new(entity.destination_lon, entity.destination_lat),
            departs_at: entity.departs_at,
            gender_preference: entity.gender_preference.into(),
            status: entity.status.into(),
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Match query row: a candidate ride joined with its owner's public
/// profile and the computed source distance.
#[derive(Debug, Clone, FromRow)]
pub struct MatchCandidateEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub source: String,
    pub source_lon: f64,
    pub source_lat: f64,
    pub destination: String,
    pub destination_lon: f64,
    pub destination_lat: f64,
    pub departs_at: DateTime<Utc>,
    pub gender_preference: GenderPreferenceDb,
    pub status: RideStatusDb,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_distance_meters: f64,
    pub owner_display_name: String,
    pub owner_contact_number: Option<String>,
    pub owner_avatar_url: Option<String>,
    pub owner_gender: GenderDb,
}

impl From<MatchCandidateEntity> for RideMatch {
    fn from(entity: MatchCandidateEntity) -> Self {
        let owner = PublicUserProfile {
            id: entity.owner_id,
            display_name: entity.owner_display_name.clone(),
            contact_number: entity.owner_contact_number.clone(),
            avatar_url: entity.owner_avatar_url.clone(),
            gender: entity.owner_gender.into(),
        };
        let ride = RideRequest {
            id: entity.id,
            owner_id: entity.owner_id,
            source: entity.source,
            source_point: GeoPoint::new(entity.source_lon, entity.source_lat),
            destination: entity.destination,
            destination_point: GeoPoint::new(entity.destination_lon, entity.destination_lat),
            departs_at: entity.departs_at,
            gender_preference: entity.gender_preference.into(),
            status: entity.status.into(),
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        };
        Self {
            ride,
            owner,
            source_distance_meters: entity.source_distance_meters,
        }
    }
}
