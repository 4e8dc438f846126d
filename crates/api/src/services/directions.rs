//! Thin client for the external route-geometry service (OSRM-style API).
//!
//! Optional collaborator: when disabled, ride details are served without
//! derived geometry. Failures degrade to `None` rather than failing the
//! request, since the geometry is decorative.

use domain::models::ride::GeoPoint;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::DirectionsConfig;

#[derive(Debug, Deserialize)]
struct RouteResponse {
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    geometry: serde_json::Value,
    distance: f64,
    duration: f64,
}

/// Derived route geometry for a set of waypoints.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RouteGeometry {
    /// GeoJSON geometry as returned by the service.
    pub geometry: serde_json::Value,
    pub distance_meters: f64,
    pub duration_secs: f64,
}

pub struct DirectionsClient {
    client: reqwest::Client,
    base_url: String,
}

impl DirectionsClient {
    /// Builds the client when the collaborator is enabled and configured.
    pub fn from_config(config: &DirectionsConfig) -> Option<Self> {
        if !config.enabled || config.url.is_empty() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches a driving route through the given waypoints. Needs at
    /// least two points; any failure is logged and swallowed.
    pub async fn route(&self, waypoints: &[GeoPoint]) -> Option<RouteGeometry> {
        if waypoints.len() < 2 {
            return None;
        }

        let coords = waypoints
            .iter()
            .map(|p| format!("{},{}", p.longitude, p.latitude))
            .collect::<Vec<_>>()
            .join(";");
        let url = format!(
            "{}/route/v1/driving/{}?overview=full&geometries=geojson",
            self.base_url, coords
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Directions request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "Directions service returned an error");
            return None;
        }

        let body: RouteResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Directions response could not be parsed");
                return None;
            }
        };

        body.routes.into_iter().next().map(|route| RouteGeometry {
            geometry: route.geometry,
            distance_meters: route.distance,
            duration_secs: route.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_config_yields_no_client() {
        let config = DirectionsConfig {
            enabled: false,
            url: "http://router.local".to_string(),
            timeout_ms: 1000,
        };
        assert!(DirectionsClient::from_config(&config).is_none());

        let config = DirectionsConfig {
            enabled: true,
            url: String::new(),
            timeout_ms: 1000,
        };
        assert!(DirectionsClient::from_config(&config).is_none());
    }

    #[tokio::test]
    async fn test_route_needs_two_waypoints() {
        let config = DirectionsConfig {
            enabled: true,
            url: "http://router.local".to_string(),
            timeout_ms: 1000,
        };
        let client = DirectionsClient::from_config(&config).unwrap();
        assert!(client.route(&[GeoPoint::new(73.9, 18.5)]).await.is_none());
    }
}
