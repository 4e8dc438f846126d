//! Ride request domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::user::{Gender, PublicUserProfile};

/// A WGS84 point as (longitude, latitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct GeoPoint {
    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,

    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// Who the ride owner is willing to be matched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderPreference {
    Any,
    Male,
    Female,
}

impl GenderPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenderPreference::Any => "any",
            GenderPreference::Male => "male",
            GenderPreference::Female => "female",
        }
    }

    /// Returns true if a requester of the given gender satisfies this preference.
    pub fn allows(&self, gender: Gender) -> bool {
        match self {
            GenderPreference::Any => true,
            GenderPreference::Male => gender == Gender::Male,
            GenderPreference::Female => gender == Gender::Female,
        }
    }
}

impl Default for GenderPreference {
    fn default() -> Self {
        GenderPreference::Any
    }
}

impl FromStr for GenderPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(GenderPreference::Any),
            "male" => Ok(GenderPreference::Male),
            "female" => Ok(GenderPreference::Female),
            _ => Err(format!("Invalid gender preference: {}", s)),
        }
    }
}

impl fmt::Display for GenderPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a ride request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Pending,
    Matched,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Matched => "matched",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RideStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RideStatus::Pending),
            "matched" => Ok(RideStatus::Matched),
            "completed" => Ok(RideStatus::Completed),
            "cancelled" => Ok(RideStatus::Cancelled),
            _ => Err(format!("Invalid ride status: {}", s)),
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single user's desired trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RideRequest {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub source: String,
    pub source_point: GeoPoint,
    pub destination: String,
    pub destination_point: GeoPoint,
    pub departs_at: DateTime<Utc>,
    pub gender_preference: GenderPreference,
    pub status: RideStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for creating a ride.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateRideRequest {
    #[validate(custom(function = "shared::validation::validate_non_blank"))]
    #[validate(length(max = 200, message = "Source label must be at most 200 characters"))]
    pub source: String,

    #[validate(nested)]
    pub source_point: GeoPoint,

    #[validate(custom(function = "shared::validation::validate_non_blank"))]
    #[validate(length(max = 200, message = "Destination label must be at most 200 characters"))]
    pub destination: String,

    #[validate(nested)]
    pub destination_point: GeoPoint,

    pub departs_at: DateTime<Utc>,

    #[serde(default)]
    pub gender_preference: GenderPreference,
}

/// Request payload for deleting a ride.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeleteRideRequest {
    pub ride_id: Uuid,
}

/// Request payload for updating a ride's departure time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UpdateRideTimeRequest {
    pub ride_id: Uuid,
    pub departs_at: DateTime<Utc>,
}

/// Request payload for updating a ride's status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UpdateRideStatusRequest {
    pub ride_id: Uuid,
    pub status: RideStatus,
}

/// Request payload for recomputing matches for an existing ride.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MatchRideRequest {
    pub ride_id: Uuid,
}

/// A candidate ride with its owner's public profile attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RideMatch {
    pub ride: RideRequest,
    pub owner: PublicUserProfile,
    /// Geodesic distance between the two source points, in meters.
    pub source_distance_meters: f64,
}

/// Response after creating a ride: the ride plus its initial matches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateRideResponse {
    pub ride: RideRequest,
    pub matches: Vec<RideMatch>,
}

/// Response for match recomputation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MatchRideResponse {
    pub matches: Vec<RideMatch>,
}

/// Response listing the requester's own rides.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MyRidesResponse {
    pub rides: Vec<RideRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_preference_allows() {
        assert!(GenderPreference::Any.allows(Gender::Male));
        assert!(GenderPreference::Any.allows(Gender::Female));
        assert!(GenderPreference::Male.allows(Gender::Male));
        assert!(!GenderPreference::Male.allows(Gender::Female));
        assert!(GenderPreference::Female.allows(Gender::Female));
        assert!(!GenderPreference::Female.allows(Gender::Male));
    }

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(73.91, 18.56).validate().is_ok());
        assert!(GeoPoint::new(190.0, 18.56).validate().is_err());
        assert!(GeoPoint::new(73.91, 95.0).validate().is_err());
    }

    #[test]
    fn test_create_ride_request_blank_source_rejected() {
        let req = CreateRideRequest {
            source: "  ".to_string(),
            source_point: GeoPoint::new(73.91, 18.56),
            destination: "Station".to_string(),
            destination_point: GeoPoint::new(73.87, 18.53),
            departs_at: Utc::now(),
            gender_preference: GenderPreference::Any,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "matched", "completed", "cancelled"] {
            assert_eq!(RideStatus::from_str(s).unwrap().as_str(), s);
        }
        assert!(RideStatus::from_str("departed").is_err());
    }
}
