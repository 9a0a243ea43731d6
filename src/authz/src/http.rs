//! HTTP transport
//!
//! Exposes an [`Api`] over axum:
//!
//! - `GET|POST /v1/:resource` - collection resource
//! - `GET|PATCH|DELETE /v1/:resource/:id` - single-object resource
//! - `GET /health` - health check
//!
//! The principal is read from the `x-principal-id` header, roles from the
//! comma-separated `x-principal-roles` header.

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method as HttpMethod, StatusCode},
    response::{IntoResponse, Json, Response as HttpResponse},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::api::{Api, Request, Response};
use crate::error::AuthzError;
use crate::types::{Method, Principal, Record, ResourceKind};

pub const PRINCIPAL_HEADER: &str = "x-principal-id";
pub const ROLES_HEADER: &str = "x-principal-roles";

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Transport error wrapping an engine error
#[derive(Debug)]
pub struct HttpError(AuthzError);

impl From<AuthzError> for HttpError {
    fn from(err: AuthzError) -> Self {
        Self(err)
    }
}

impl HttpError {
    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AuthzError::InvalidInclude { .. } => (StatusCode::BAD_REQUEST, "invalid_include"),
            AuthzError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AuthzError::MethodDisabled { .. } => {
                (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed")
            }
            AuthzError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AuthzError::ObjectNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> HttpResponse {
        let (status, error) = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

fn into_http(response: Response) -> HttpResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    if status == StatusCode::NO_CONTENT {
        return status.into_response();
    }
    (status, Json(response.body)).into_response()
}

/// Principal from request headers
pub fn principal_from_headers(headers: &HeaderMap) -> Option<Principal> {
    let id = headers.get(PRINCIPAL_HEADER)?.to_str().ok()?.trim();
    if id.is_empty() {
        return None;
    }
    let mut principal = Principal::new(id);
    if let Some(roles) = headers.get(ROLES_HEADER).and_then(|v| v.to_str().ok()) {
        for role in roles.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            principal = principal.with_role(role);
        }
    }
    Some(principal)
}

/// Request payload: a JSON:API document `{data: {id, attributes}}` or a
/// plain object
fn parse_payload(body: &Bytes) -> Result<Option<Record>, HttpError> {
    if body.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AuthzError::BadRequest(format!("Malformed request body: {}", e)))?;

    let Some(data) = value.get("data") else {
        return Ok(value.as_object().cloned());
    };
    // the resource identifier travels in the URL, never in the attribute map
    let record = data
        .get("attributes")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Ok(Some(record))
}

fn method_of(method: &HttpMethod) -> Result<Method, HttpError> {
    method.as_str().parse::<Method>().map_err(|_| {
        HttpError(AuthzError::MethodDisabled {
            resource: "*".to_string(),
            method: Method::Get,
        })
    })
}

fn serve(
    api: &Api,
    path: &str,
    kind: ResourceKind,
    method: &HttpMethod,
    mut request: Request,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<HttpResponse, HttpError> {
    let resource = api.resource_at(path, kind).ok_or_else(|| AuthzError::ObjectNotFound {
        entity: "resource".to_string(),
        id: path.to_string(),
    })?;
    let method = method_of(method)?;

    request.principal = principal_from_headers(headers);
    request.payload = parse_payload(body)?;

    info!(
        "{} /v1/{} principal={}",
        method,
        path,
        request.principal.as_ref().map(|p| p.id.as_str()).unwrap_or("-")
    );
    let response = api.dispatch(resource, method, request)?;
    Ok(into_http(response))
}

async fn collection(
    State(api): State<Arc<Api>>,
    Path(resource): Path<String>,
    method: HttpMethod,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HttpResponse, HttpError> {
    let request = Request::new().with_query(query.as_deref().unwrap_or(""));
    serve(&api, &resource, ResourceKind::List, &method, request, &headers, &body)
}

async fn object(
    State(api): State<Arc<Api>>,
    Path((resource, id)): Path<(String, String)>,
    method: HttpMethod,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HttpResponse, HttpError> {
    let request = Request::new()
        .with_query(query.as_deref().unwrap_or(""))
        .with_id(id);
    serve(&api, &resource, ResourceKind::Detail, &method, request, &headers, &body)
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
    }))
}

/// Router serving `api`
pub fn router(api: Arc<Api>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health))
        .route("/v1/:resource", get(collection).post(collection))
        .route(
            "/v1/:resource/:id",
            get(object).patch(object).delete(object),
        )
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(api)
}
