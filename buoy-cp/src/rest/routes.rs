use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{self, AppState};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "buoy Control Plane API",
        version = "0.1.0",
        description = "REST API for the buoy floating-IP load balancer. Stores routes and compiles them into switch flow tables.",
        license(name = "MIT")
    ),
    tags(
        (name = "system", description = "System information"),
        (name = "routes", description = "Floating IP route operations")
    ),
    paths(
        handlers::get_version,
        handlers::create_route,
        handlers::get_route,
        handlers::list_routes,
    ),
    components(schemas(
        handlers::VersionInfo,
        handlers::ApiError,
        handlers::EndpointBody,
        handlers::RouteBody,
        handlers::CreateRouteRequest,
    ))
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // System
        .route("/version", get(handlers::get_version))
        // Routes
        .route("/routes", get(handlers::list_routes))
        .route("/routes", post(handlers::create_route))
        .route("/routes/{public_ip}", get(handlers::get_route));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
