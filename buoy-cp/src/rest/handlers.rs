use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::flow::FlowError;
use crate::ip::{self, FormatError};
use crate::manager::Manager;
use crate::route::Route;
use crate::store::StoreError;

/// Shared application state
pub struct AppState {
    pub manager: Arc<Manager>,
}

/// API error response
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub code: u32,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code {
            404 => StatusCode::NOT_FOUND,
            400 => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError {
            error: e.to_string(),
            code: 404,
        }
    }
}

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        ApiError {
            error: e.to_string(),
            code: 400,
        }
    }
}

impl From<FormatError> for ApiError {
    fn from(e: FormatError) -> Self {
        ApiError {
            error: e.to_string(),
            code: 400,
        }
    }
}

// === Version ===

/// Version information
#[derive(Serialize, ToSchema)]
pub struct VersionInfo {
    pub version: String,
}

/// Get service version
#[utoipa::path(
    get,
    path = "/api/v1/version",
    responses(
        (status = 200, description = "Service version", body = VersionInfo)
    ),
    tag = "system"
)]
pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// === Routes ===

/// One backend of a floating IP
#[derive(Serialize, Deserialize, ToSchema)]
pub struct EndpointBody {
    /// Private backend address, dotted quad
    pub private_ip: String,
}

/// A floating IP route
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RouteBody {
    /// Public floating IP, dotted quad
    pub public_ip: String,
    /// Ordered backends; position is the multipath link index
    pub endpoints: Vec<EndpointBody>,
}

/// Create-route request
#[derive(Deserialize, ToSchema)]
pub struct CreateRouteRequest {
    pub route: RouteBody,
}

impl From<&Route> for RouteBody {
    fn from(route: &Route) -> Self {
        RouteBody {
            public_ip: route.public_ip.to_string(),
            endpoints: route
                .endpoints
                .iter()
                .map(|e| EndpointBody {
                    private_ip: e.private_ip.to_string(),
                })
                .collect(),
        }
    }
}

/// Resolve address text once, at the API boundary.
fn parse_route(body: &RouteBody) -> Result<Route, FormatError> {
    let public_ip = Ipv4Addr::from(ip::parse_ipv4(&body.public_ip)?);
    let backends = body
        .endpoints
        .iter()
        .map(|e| ip::parse_ipv4(&e.private_ip).map(Ipv4Addr::from))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Route::new(public_ip, backends))
}

/// Create a route and install its flows on all connected switches
#[utoipa::path(
    post,
    path = "/api/v1/routes",
    request_body = CreateRouteRequest,
    responses(
        (status = 201, description = "Route created"),
        (status = 400, description = "Malformed address or empty endpoint set", body = ApiError)
    ),
    tag = "routes"
)]
pub async fn create_route(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRouteRequest>,
) -> Result<StatusCode, ApiError> {
    let route = parse_route(&req.route)?;
    state.manager.create_route(route).await?;
    Ok(StatusCode::CREATED)
}

/// Get one route by public IP
#[utoipa::path(
    get,
    path = "/api/v1/routes/{public_ip}",
    params(
        ("public_ip" = String, Path, description = "Public floating IP")
    ),
    responses(
        (status = 200, description = "The route", body = RouteBody),
        (status = 400, description = "Malformed address", body = ApiError),
        (status = 404, description = "No such route", body = ApiError)
    ),
    tag = "routes"
)]
pub async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(public_ip): Path<String>,
) -> Result<Json<RouteBody>, ApiError> {
    let addr = Ipv4Addr::from(ip::parse_ipv4(&public_ip)?);
    let route = state.manager.get_route(addr).await?;
    Ok(Json(RouteBody::from(&route)))
}

/// List all routes
#[utoipa::path(
    get,
    path = "/api/v1/routes",
    responses(
        (status = 200, description = "All routes", body = [RouteBody])
    ),
    tag = "routes"
)]
pub async fn list_routes(State(state): State<Arc<AppState>>) -> Json<Vec<RouteBody>> {
    let routes = state.manager.list_routes().await;
    Json(routes.iter().map(RouteBody::from).collect())
}
