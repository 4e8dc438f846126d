//! Ride compatibility filtering.
//!
//! The persistence layer runs the indexed version of this filter in SQL;
//! this module is the pure mirror used for unit testing and in-process
//! re-checks. Both must agree on the constants below.

use chrono::Duration;
use geo::{point, HaversineDistance};

use crate::models::ride::{GeoPoint, RideRequest};
use crate::models::user::Gender;

/// Symmetric matching window around the requested departure time.
pub const MATCH_WINDOW_MINUTES: i64 = 30;

/// Maximum geodesic distance between compatible points, in meters.
pub const MAX_POINT_DISTANCE_METERS: f64 = 3_000.0;

/// Tunable matching behavior.
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// When true, destination points must also lie within
    /// [`MAX_POINT_DISTANCE_METERS`] of each other. Source-only matching
    /// over-broadens results for trips that share an origin but diverge.
    pub strict_destination: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            strict_destination: true,
        }
    }
}

/// Geodesic distance between two points in meters.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let p1 = point!(x: a.longitude, y: a.latitude);
    let p2 = point!(x: b.longitude, y: b.latitude);
    p1.haversine_distance(&p2)
}

/// Returns true if `candidate` is a valid match for `ride` requested by a
/// user of `requester_gender`.
///
/// A ride never matches itself or another ride of the same owner. The
/// departure window is inclusive on both ends.
pub fn is_compatible(
    ride: &RideRequest,
    requester_gender: Gender,
    candidate: &RideRequest,
    options: &MatchOptions,
) -> bool {
    if candidate.id == ride.id || candidate.owner_id == ride.owner_id {
        return false;
    }

    let window = Duration::minutes(MATCH_WINDOW_MINUTES);
    if candidate.departs_at < ride.departs_at - window
        || candidate.departs_at > ride.departs_at + window
    {
        return false;
    }

    if !candidate.gender_preference.allows(requester_gender) {
        return false;
    }

    if distance_meters(&ride.source_point, &candidate.source_point) > MAX_POINT_DISTANCE_METERS {
        return false;
    }

    if options.strict_destination
        && distance_meters(&ride.destination_point, &candidate.destination_point)
            > MAX_POINT_DISTANCE_METERS
    {
        return false;
    }

    true
}

/// Filters `candidates` against `ride` and orders them by source
/// proximity, nearest first.
pub fn rank_candidates(
    ride: &RideRequest,
    requester_gender: Gender,
    candidates: Vec<RideRequest>,
    options: &MatchOptions,
) -> Vec<(RideRequest, f64)> {
    let mut matches: Vec<(RideRequest, f64)> = candidates
        .into_iter()
        .filter(|c| is_compatible(ride, requester_gender, c, options))
        .map(|c| {
            let distance = distance_meters(&ride.source_point, &c.source_point);
            (c, distance)
        })
        .collect();

    matches.sort_by(|a, b| a.1.total_cmp(&b.1));
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ride::{GenderPreference, RideStatus};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn ride(
        owner: Uuid,
        source: GeoPoint,
        destination: GeoPoint,
        minutes_offset: i64,
        preference: GenderPreference,
    ) -> RideRequest {
        let departs = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
            + Duration::minutes(minutes_offset);
        RideRequest {
            id: Uuid::new_v4(),
            owner_id: owner,
            source: "A".to_string(),
            source_point: source,
            destination: "B".to_string(),
            destination_point: destination,
            departs_at: departs,
            gender_preference: preference,
            status: RideStatus::Pending,
            created_at: departs,
            updated_at: departs,
        }
    }

    // Roughly 0.01 degrees of latitude is ~1.1 km.
    const PUNE: GeoPoint = GeoPoint {
        longitude: 73.8567,
        latitude: 18.5204,
    };
    const PUNE_NEARBY: GeoPoint = GeoPoint {
        longitude: 73.8567,
        latitude: 18.5304,
    };
    const PUNE_FAR: GeoPoint = GeoPoint {
        longitude: 73.8567,
        latitude: 18.5704,
    };
    const STATION: GeoPoint = GeoPoint {
        longitude: 73.8744,
        latitude: 18.5286,
    };

    #[test]
    fn test_distance_sanity() {
        let d = distance_meters(&PUNE, &PUNE_NEARBY);
        assert!((900.0..1_300.0).contains(&d), "got {}", d);
        assert!(distance_meters(&PUNE, &PUNE_FAR) > MAX_POINT_DISTANCE_METERS);
    }

    #[test]
    fn test_match_is_symmetric() {
        let a = ride(Uuid::new_v4(), PUNE, STATION, 0, GenderPreference::Any);
        let b = ride(Uuid::new_v4(), PUNE_NEARBY, STATION, 20, GenderPreference::Any);
        let opts = MatchOptions::default();

        assert!(is_compatible(&a, Gender::Female, &b, &opts));
        assert!(is_compatible(&b, Gender::Male, &a, &opts));
    }

    #[test]
    fn test_never_matches_self_or_same_owner() {
        let owner = Uuid::new_v4();
        let a = ride(owner, PUNE, STATION, 0, GenderPreference::Any);
        let b = ride(owner, PUNE_NEARBY, STATION, 5, GenderPreference::Any);
        let opts = MatchOptions::default();

        assert!(!is_compatible(&a, Gender::Male, &a, &opts));
        assert!(!is_compatible(&a, Gender::Male, &b, &opts));
    }

    #[test]
    fn test_window_edges_inclusive() {
        let a = ride(Uuid::new_v4(), PUNE, STATION, 0, GenderPreference::Any);
        let at_edge = ride(Uuid::new_v4(), PUNE, STATION, 30, GenderPreference::Any);
        let past_edge = ride(Uuid::new_v4(), PUNE, STATION, 31, GenderPreference::Any);
        let early_edge = ride(Uuid::new_v4(), PUNE, STATION, -30, GenderPreference::Any);
        let opts = MatchOptions::default();

        assert!(is_compatible(&a, Gender::Male, &at_edge, &opts));
        assert!(is_compatible(&a, Gender::Male, &early_edge, &opts));
        assert!(!is_compatible(&a, Gender::Male, &past_edge, &opts));
    }

    #[test]
    fn test_gender_preference_respected() {
        let a = ride(Uuid::new_v4(), PUNE, STATION, 0, GenderPreference::Any);
        let women_only = ride(Uuid::new_v4(), PUNE, STATION, 0, GenderPreference::Female);
        let opts = MatchOptions::default();

        assert!(is_compatible(&a, Gender::Female, &women_only, &opts));
        assert!(!is_compatible(&a, Gender::Male, &women_only, &opts));
    }

    #[test]
    fn test_source_distance_filter() {
        let a = ride(Uuid::new_v4(), PUNE, STATION, 0, GenderPreference::Any);
        let far = ride(Uuid::new_v4(), PUNE_FAR, STATION, 0, GenderPreference::Any);
        let opts = MatchOptions::default();

        assert!(!is_compatible(&a, Gender::Male, &far, &opts));
    }

    #[test]
    fn test_strict_destination_toggle() {
        let a = ride(Uuid::new_v4(), PUNE, STATION, 0, GenderPreference::Any);
        let diverging = ride(Uuid::new_v4(), PUNE_NEARBY, PUNE_FAR, 0, GenderPreference::Any);

        let strict = MatchOptions {
            strict_destination: true,
        };
        let loose = MatchOptions {
            strict_destination: false,
        };

        assert!(!is_compatible(&a, Gender::Male, &diverging, &strict));
        assert!(is_compatible(&a, Gender::Male, &diverging, &loose));
    }

    #[test]
    fn test_rank_orders_by_source_proximity() {
        let a = ride(Uuid::new_v4(), PUNE, STATION, 0, GenderPreference::Any);
        let near = ride(Uuid::new_v4(), PUNE, STATION, 5, GenderPreference::Any);
        let further = ride(Uuid::new_v4(), PUNE_NEARBY, STATION, 5, GenderPreference::Any);

        let ranked = rank_candidates(
            &a,
            Gender::Female,
            vec![further.clone(), near.clone()],
            &MatchOptions::default(),
        );

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0.id, near.id);
        assert_eq!(ranked[1].0.id, further.id);
        assert!(ranked[0].1 <= ranked[1].1);
    }
}
