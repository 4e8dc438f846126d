use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{groups, health, rides, ws};
use crate::services::{DirectionsClient, GroupLifecycle, ReadinessCoordinator, RoomRegistry};
use shared::jwt::JwtConfig;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtConfig>,
    pub lifecycle: Arc<GroupLifecycle>,
    pub coordinator: Arc<ReadinessCoordinator>,
    pub rooms: Arc<RoomRegistry>,
    pub directions: Option<Arc<DirectionsClient>>,
}

pub fn create_app(config: Config, pool: PgPool, jwt: JwtConfig) -> Router {
    let config = Arc::new(config);

    let rooms = Arc::new(RoomRegistry::new());
    let lifecycle = Arc::new(GroupLifecycle::new(pool.clone()));
    let coordinator = Arc::new(ReadinessCoordinator::new(
        Arc::clone(&rooms),
        Arc::clone(&lifecycle) as _,
        Duration::from_secs(config.readiness.countdown_secs),
    ));
    let directions = DirectionsClient::from_config(&config.directions).map(Arc::new);

    let state = AppState {
        pool,
        config: config.clone(),
        jwt: Arc::new(jwt),
        lifecycle,
        coordinator,
        rooms,
        directions,
    };

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        // Production: only allow specified origins
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // JWT-protected routes under the versioned API prefix. Handlers pull
    // the caller's identity through the UserAuth extractor.
    let api_routes = Router::new()
        // Ride routes
        .route("/api/v1/rides", post(rides::create_ride))
        .route("/api/v1/rides", delete(rides::delete_ride))
        .route("/api/v1/rides/time", patch(rides::update_ride_time))
        .route("/api/v1/rides/status", patch(rides::update_ride_status))
        .route("/api/v1/rides/mine", get(rides::my_rides))
        .route("/api/v1/rides/match", post(rides::match_ride))
        .route("/api/v1/rides/:ride_id/details", get(rides::ride_details))
        // Group routes
        .route("/api/v1/groups", post(groups::create_group))
        .route("/api/v1/groups", delete(groups::delete_group))
        .route("/api/v1/groups/close", post(groups::close_group))
        .route("/api/v1/groups/invite", post(groups::invite_user))
        .route("/api/v1/groups/accept-invite", post(groups::accept_invite))
        .route("/api/v1/groups/reject-invite", post(groups::reject_invite))
        .route("/api/v1/groups/join-request", post(groups::request_join))
        .route(
            "/api/v1/groups/accept-join-request",
            post(groups::accept_join_request),
        )
        .route(
            "/api/v1/groups/reject-join-request",
            post(groups::reject_join_request),
        )
        .route("/api/v1/groups/remove", post(groups::remove_member))
        .route("/api/v1/groups/leave", post(groups::leave_group))
        .route(
            "/api/v1/groups/member-status",
            patch(groups::set_member_status),
        )
        .route("/api/v1/groups/mine", get(groups::my_groups))
        .route("/api/v1/groups/my-invites", get(groups::my_invites))
        .route("/api/v1/groups/:group_id", get(groups::get_group))
        .route(
            "/api/v1/groups/:group_id/messages",
            get(groups::group_messages),
        );

    // Public routes (no bearer token; the channel authenticates through
    // its token query parameter at upgrade time)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
