//! Ride endpoint handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use domain::models::group::{GroupStatus, GroupView};
use domain::models::ride::{
    CreateRideRequest, CreateRideResponse, DeleteRideRequest, GeoPoint, MatchRideRequest,
    MatchRideResponse, MyRidesResponse, RideMatch, RideRequest, UpdateRideStatusRequest,
    UpdateRideTimeRequest,
};
use domain::services::matching::{MATCH_WINDOW_MINUTES, MAX_POINT_DISTANCE_METERS};
use persistence::entities::{GenderDb, RideEntity};
use persistence::repositories::{RideRepository, UserRepository};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;
use crate::services::directions::RouteGeometry;

/// Ride details: the ride, its coordination group once one has closed
/// around it, the member waypoints, and optionally derived route geometry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RideDetailsResponse {
    pub ride: RideRequest,
    pub group: Option<GroupView>,
    pub waypoints: Vec<GeoPoint>,
    pub route: Option<RouteGeometry>,
}

/// POST /api/v1/rides
///
/// Creates a ride request and returns it with its initial matches.
pub async fn create_ride(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<CreateRideResponse>), ApiError> {
    req.validate()?;

    let users = UserRepository::new(state.pool.clone());
    let owner = users
        .find_profile(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let rides = RideRepository::new(state.pool.clone());
    let ride = rides
        .create_ride(
            auth.user_id,
            &req.source,
            req.source_point.longitude,
            req.source_point.latitude,
            &req.destination,
            req.destination_point.longitude,
            req.destination_point.latitude,
            req.departs_at,
            req.gender_preference.into(),
        )
        .await?;

    let matches = matches_for_ride(&state, &ride, owner.gender).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRideResponse {
            ride: ride.into(),
            matches,
        }),
    ))
}

/// DELETE /api/v1/rides
pub async fn delete_ride(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<DeleteRideRequest>,
) -> Result<StatusCode, ApiError> {
    let rides = RideRepository::new(state.pool.clone());
    owned_ride(&rides, req.ride_id, auth.user_id).await?;

    rides.delete_ride(req.ride_id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/v1/rides/time
pub async fn update_ride_time(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<UpdateRideTimeRequest>,
) -> Result<Json<RideRequest>, ApiError> {
    let rides = RideRepository::new(state.pool.clone());
    owned_ride(&rides, req.ride_id, auth.user_id).await?;

    let updated = rides
        .update_departure_time(req.ride_id, auth.user_id, req.departs_at)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ride not found".into()))?;
    Ok(Json(updated.into()))
}

/// PATCH /api/v1/rides/status
pub async fn update_ride_status(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<UpdateRideStatusRequest>,
) -> Result<Json<RideRequest>, ApiError> {
    let rides = RideRepository::new(state.pool.clone());
    owned_ride(&rides, req.ride_id, auth.user_id).await?;

    let updated = rides
        .update_status(req.ride_id, auth.user_id, req.status.into())
        .await?
        .ok_or_else(|| ApiError::NotFound("Ride not found".into()))?;
    Ok(Json(updated.into()))
}

/// GET /api/v1/rides/mine
pub async fn my_rides(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<MyRidesResponse>, ApiError> {
    let rides = RideRepository::new(state.pool.clone());
    let entities = rides.list_by_owner(auth.user_id).await?;
    Ok(Json(MyRidesResponse {
        rides: entities.into_iter().map(Into::into).collect(),
    }))
}

/// POST /api/v1/rides/match
///
/// Recomputes matches for one of the caller's rides.
pub async fn match_ride(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<MatchRideRequest>,
) -> Result<Json<MatchRideResponse>, ApiError> {
    let rides = RideRepository::new(state.pool.clone());
    let ride = owned_ride(&rides, req.ride_id, auth.user_id).await?;

    let users = UserRepository::new(state.pool.clone());
    let owner = users
        .find_profile(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let matches = matches_for_ride(&state, &ride, owner.gender).await?;
    Ok(Json(MatchRideResponse { matches }))
}

/// GET /api/v1/rides/:ride_id/details
pub async fn ride_details(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideDetailsResponse>, ApiError> {
    let rides = RideRepository::new(state.pool.clone());
    let ride = owned_ride(&rides, ride_id, auth.user_id).await?;

    let group = match state.lifecycle.group_for_ride(ride_id).await? {
        Some(group)
            if matches!(group.status, GroupStatus::Closed | GroupStatus::Started) =>
        {
            Some(state.lifecycle.group_view(&group).await?)
        }
        _ => None,
    };

    // Waypoints: each member's pickup point, ending at the shared
    // destination. A ride without a settled group is just its own trip.
    let mut waypoints = Vec::new();
    if let Some(view) = &group {
        for member in &view.members {
            if let Some(member_ride) = rides.find_by_id(member.ride_id).await? {
                waypoints.push(GeoPoint::new(member_ride.source_lon, member_ride.source_lat));
            }
        }
    } else {
        waypoints.push(GeoPoint::new(ride.source_lon, ride.source_lat));
    }
    waypoints.push(GeoPoint::new(ride.destination_lon, ride.destination_lat));

    let route = match &state.directions {
        Some(client) => client.route(&waypoints).await,
        None => None,
    };

    Ok(Json(RideDetailsResponse {
        ride: ride.into(),
        group,
        waypoints,
        route,
    }))
}

/// Loads a ride and verifies the caller owns it.
async fn owned_ride(
    rides: &RideRepository,
    ride_id: Uuid,
    user_id: Uuid,
) -> Result<RideEntity, ApiError> {
    let ride = rides
        .find_by_id(ride_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ride not found".into()))?;
    if ride.owner_id != user_id {
        return Err(ApiError::Forbidden("Not the owner of this ride".into()));
    }
    Ok(ride)
}

async fn matches_for_ride(
    state: &AppState,
    ride: &RideEntity,
    owner_gender: GenderDb,
) -> Result<Vec<RideMatch>, ApiError> {
    let rides = RideRepository::new(state.pool.clone());
    let candidates = rides
        .find_matches(
            ride.owner_id,
            ride.source_lon,
            ride.source_lat,
            ride.destination_lon,
            ride.destination_lat,
            ride.departs_at,
            owner_gender,
            ride.gender_preference,
            state.config.matching.strict_destination,
            MATCH_WINDOW_MINUTES,
            MAX_POINT_DISTANCE_METERS,
        )
        .await?;
    Ok(candidates.into_iter().map(Into::into).collect())
}
