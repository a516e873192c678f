//! The public HTTP front door.
//!
//! `GET /` answers a fixed liveness payload. `ANY /<reference>` is looked up
//! in the routing table and forwarded to `http://localhost:<port>/sse` on the
//! provider's adapter; the upstream status, headers and body come back as-is
//! (the body is streamed, so SSE works through the relay).

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use serde_json::json;

use crate::error::RelayError;
use crate::provider::provider_reference;
use crate::routing::RoutingTable;

/// Largest request body forwarded to an adapter.
pub const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

pub const LIVENESS_MESSAGE: &str = "MCP Server is running";

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state of the front door.
#[derive(Clone)]
pub struct FrontDoor {
    routes: RoutingTable,
    client: reqwest::Client,
}

impl FrontDoor {
    pub fn new(routes: RoutingTable) -> Self {
        Self {
            routes,
            client: reqwest::Client::new(),
        }
    }

    /// Build the axum router for the front door.
    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(liveness))
            .route("/:reference", any(forward))
            .fallback(not_found)
            .with_state(self)
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, payload) = match &self {
            RelayError::RouteNotFound(_) => {
                (StatusCode::NOT_FOUND, json!({"error": "Server not found"}))
            }
            RelayError::Unavailable(_, state) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "Server unavailable", "state": state}),
            ),
            RelayError::Upstream(_, _) => (StatusCode::BAD_GATEWAY, json!({"error": "Bad gateway"})),
            RelayError::RequestBody(_) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "Invalid request body"}),
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": other.to_string()}),
            ),
        };
        (status, Json(payload)).into_response()
    }
}

async fn liveness() -> Json<serde_json::Value> {
    Json(json!({"message": LIVENESS_MESSAGE}))
}

async fn not_found() -> Response {
    RelayError::RouteNotFound(String::new()).into_response()
}

async fn forward(
    State(door): State<FrontDoor>,
    Path(segment): Path<String>,
    request: Request,
) -> Result<Response, RelayError> {
    // The segment arrives decoded; routes are keyed by the encoded form
    let reference = provider_reference(&segment);
    let route = door
        .routes
        .lookup(&reference)
        .ok_or_else(|| RelayError::RouteNotFound(reference.clone()))?;

    let state = route.state();
    if !state.accepts_traffic() {
        tracing::debug!(reference = %reference, state = %state, "rejecting request to unavailable provider");
        return Err(RelayError::Unavailable(reference, state));
    }

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| RelayError::RequestBody(e.to_string()))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    let url = route.upstream_url();
    tracing::debug!(reference = %reference, method = %parts.method, url = %url, "forwarding request");

    let mut upstream = door.client.request(parts.method, &url).headers(headers);
    if !body.is_empty() {
        upstream = upstream.body(body);
    }
    let upstream = upstream.send().await.map_err(|e| {
        tracing::warn!(reference = %reference, url = %url, error = %e, "upstream request failed");
        RelayError::Upstream(reference.clone(), e.to_string())
    })?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
