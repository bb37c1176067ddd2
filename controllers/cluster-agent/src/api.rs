//! HTTP surface.
//!
//! A thin proxy over the cluster API for the monitored resource types, plus
//! liveness probes. Independent of the watch-and-relay path.
//!
//! Routes:
//! - `GET /`, `GET /healthz`
//! - `GET /nodesmetrics`, `GET /podsmetrics` (metrics API usage)
//! - `GET /{resource}` and `POST /{resource}`
//! - `GET|PUT|DELETE /{resource}/{name}`
//!
//! Namespaced types take `?namespace=`; item operations default to `default`
//! and listing without it covers all namespaces.

use crate::error::AgentError;
use crate::metrics::{NodeRow, node_rows};
use crate::resources::{
    api_resource, from_path_segment, is_cluster_scoped, node_metrics_resource,
    pod_metrics_resource,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::{ApiResource, TypeMeta};
use kube::Client;
use relay_client::ResourceType;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const DEFAULT_NAMESPACE: &str = "default";

/// Response body of every resource route
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: T,
    pub resource_type: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(resource_type: ResourceType, data: T) -> Json<Self> {
        Json(Self {
            message: "ok".to_string(),
            data,
            resource_type: Some(resource_type.as_str().to_string()),
        })
    }
}

/// Errors returned by the HTTP surface
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown resource type: {0}")]
    UnknownResource(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Kube(#[from] kube::Error),

    #[error("invalid object: {0}")]
    InvalidObject(#[from] serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownResource(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Kube(_) | ApiError::InvalidObject(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        let body = ApiResponse {
            message: self.to_string(),
            data: serde_json::Value::Null,
            resource_type: None,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NamespaceQuery {
    namespace: Option<String>,
}

/// Resolved target of a resource route
struct Target {
    resource_type: ResourceType,
    resource: ApiResource,
    api: Api<DynamicObject>,
}

fn resolve(
    client: Client,
    resource: &str,
    namespace: Option<&str>,
    item: bool,
) -> Result<Target, ApiError> {
    let resource_type =
        from_path_segment(resource).ok_or_else(|| ApiError::UnknownResource(resource.to_string()))?;
    let ar = api_resource(resource_type);

    let api = if is_cluster_scoped(resource_type) {
        if let Some(ns) = namespace {
            return Err(ApiError::BadRequest(format!(
                "{resource_type} are cluster-scoped, got namespace '{ns}'"
            )));
        }
        Api::all_with(client, &ar)
    } else {
        match namespace {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None if item => Api::namespaced_with(client, DEFAULT_NAMESPACE, &ar),
            None => Api::all_with(client, &ar),
        }
    };

    Ok(Target {
        resource_type,
        resource: ar,
        api,
    })
}

/// Decode a request body, filling in apiVersion and kind when omitted
fn decode_object(
    resource: &ApiResource,
    body: serde_json::Value,
) -> Result<DynamicObject, ApiError> {
    let mut object: DynamicObject = serde_json::from_value(body)?;
    object.types.get_or_insert_with(|| TypeMeta {
        api_version: resource.api_version.clone(),
        kind: resource.kind.clone(),
    });
    Ok(object)
}

async fn list_resources(
    State(client): State<Client>,
    Path(resource): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let target = resolve(client, &resource, query.namespace.as_deref(), false)?;
    let list = target.api.list(&ListParams::default()).await?;
    debug!(resource = %target.resource_type, count = list.items.len(), "Listed objects");
    Ok(ApiResponse::ok(target.resource_type, list.items))
}

async fn create_resource(
    State(client): State<Client>,
    Path(resource): Path<String>,
    Query(query): Query<NamespaceQuery>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let target = resolve(client, &resource, query.namespace.as_deref(), true)?;
    let object = decode_object(&target.resource, body)?;
    let created = target.api.create(&PostParams::default(), &object).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(target.resource_type, created)))
}

async fn get_resource(
    State(client): State<Client>,
    Path((resource, name)): Path<(String, String)>,
    Query(query): Query<NamespaceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let target = resolve(client, &resource, query.namespace.as_deref(), true)?;
    let object = target.api.get(&name).await?;
    Ok(ApiResponse::ok(target.resource_type, object))
}

async fn replace_resource(
    State(client): State<Client>,
    Path((resource, name)): Path<(String, String)>,
    Query(query): Query<NamespaceQuery>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let target = resolve(client, &resource, query.namespace.as_deref(), true)?;
    let object = decode_object(&target.resource, body)?;
    let replaced = target.api.replace(&name, &PostParams::default(), &object).await?;
    Ok(ApiResponse::ok(target.resource_type, replaced))
}

async fn delete_resource(
    State(client): State<Client>,
    Path((resource, name)): Path<(String, String)>,
    Query(query): Query<NamespaceQuery>,
) -> Result<StatusCode, ApiError> {
    let target = resolve(client, &resource, query.namespace.as_deref(), true)?;
    target.api.delete(&name, &DeleteParams::default()).await?;
    info!(resource = %target.resource_type, name = %name, "Deleted object");
    Ok(StatusCode::NO_CONTENT)
}

/// Usage table of every node: status capacity joined with metrics API usage
async fn node_metrics(State(client): State<Client>) -> Result<Json<Vec<NodeRow>>, ApiError> {
    let metrics = Api::<DynamicObject>::all_with(client.clone(), &node_metrics_resource())
        .list(&ListParams::default())
        .await?;
    let nodes = Api::<Node>::all(client).list(&ListParams::default()).await?;
    let rows = node_rows(&nodes.items, &metrics.items);
    debug!(nodes = rows.len(), metrics = metrics.items.len(), "Built node metrics");
    Ok(Json(rows))
}

/// Raw pod metrics, optionally limited to one namespace
async fn pod_metrics(
    State(client): State<Client>,
    Query(query): Query<NamespaceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ar = pod_metrics_resource();
    let api: Api<DynamicObject> = match query.namespace.as_deref() {
        Some(ns) => Api::namespaced_with(client, ns, &ar),
        None => Api::all_with(client, &ar),
    };
    let list = api.list(&ListParams::default()).await?;
    Ok(ApiResponse::ok(ResourceType::Pods, list.items))
}

/// Build the router for all HTTP routes
pub fn router(client: Client) -> Router {
    Router::new()
        .route("/", get(|| async { "Hello, World!" }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/nodesmetrics", get(node_metrics))
        .route("/podsmetrics", get(pod_metrics))
        .route("/{resource}", get(list_resources).post(create_resource))
        .route(
            "/{resource}/{name}",
            get(get_resource).put(replace_resource).delete(delete_resource),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(client)
}

/// Serve the HTTP surface until shutdown
pub async fn serve(
    client: Client,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), AgentError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router(client))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
