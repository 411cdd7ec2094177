//! The authenticated HTTP surface over the request pipeline.
//!
//! Every route under `/api` requires `Authorization: Bearer <tokenId>`
//! except `/api/info`. The error taxonomy maps onto status codes here
//! and nowhere else; response bodies are always
//! `{"error":{"kind","message",...}}` on failure.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use mcpr_catalog::exposed_tool_name;
use mcpr_core::{redact_token_id, ErrorKind, Result, RouterError, ServerRecord, TokenRecord};
use mcpr_policy::service::NewRule;
use mcpr_server::{NewServer, ServerPatch};
use mcpr_store::{audit::OrderDir, AuditFilter};
use mcpr_token::GenerateOptions;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::pipeline::{self, ToolCallRequest};
use crate::state::Gateway;

const DEADLINE_HEADER: &str = "x-request-deadline-ms";

pub fn router(gateway: Arc<Gateway>) -> Router {
    let mut app = Router::new()
        .route("/api/info", get(info))
        .route("/api/servers", get(list_servers).post(add_server))
        .route(
            "/api/servers/{id}",
            get(get_server).put(update_server).delete(remove_server),
        )
        .route("/api/servers/{id}/start", post(start_server))
        .route("/api/servers/{id}/stop", post(stop_server))
        .route("/api/servers/{id}/restart", post(restart_server))
        .route("/api/servers/{id}/tools", get(server_tools))
        .route("/api/servers/{id}/tools/{tool}/call", post(call_by_server))
        .route("/api/servers/{id}/resources", get(server_resources))
        .route("/api/servers/{id}/resources/read", get(read_server_resource))
        .route("/api/servers/{id}/prompts", get(server_prompts))
        .route("/api/servers/{id}/prompts/{prompt}", get(get_server_prompt))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/search", get(search_tools))
        .route("/api/tools/{exposed}/call", post(call_by_exposed))
        .route("/api/tokens", get(list_tokens).post(create_token))
        .route("/api/tokens/{id}", delete(revoke_token))
        .route("/api/tokens/{id}/refresh", post(refresh_token))
        .route("/api/policies", get(list_policies).post(add_policy))
        .route(
            "/api/policies/{id}",
            get(get_policy).put(update_policy).delete(remove_policy),
        )
        .route("/api/approvals", get(list_approvals))
        .route("/api/approvals/{id}/respond", post(respond_approval))
        .route("/api/audit", get(query_audit))
        .route("/api/events", get(event_stream))
        .with_state(gateway.clone());

    if !gateway.config.cors_origins.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = gateway
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        app = app.layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );
    }

    app
}

/// Bind and serve until ctrl-c, then shut the gateway down in order.
pub async fn serve(gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let addr = gateway.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "mcp-router listening");

    gateway.spawn_background_tasks();
    let app = router(gateway.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    gateway.shutdown().await;
    Ok(())
}

// -- Error surface --

struct ApiError(RouterError);

impl From<RouterError> for ApiError {
    fn from(error: RouterError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Capacity => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut error = json!({
            "kind": self.0.kind(),
            "message": self.0.to_string(),
        });
        if let Some(rule_id) = self.0.rule_id() {
            error["ruleId"] = json!(rule_id);
        }
        if let Some(retry_after) = self.0.retry_after_ms() {
            error["retryAfter"] = json!(retry_after);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// -- Auth helpers --

fn bearer_token(headers: &HeaderMap) -> Result<String> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| RouterError::unauthenticated("missing Authorization header"))?;
    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| RouterError::unauthenticated("Authorization header is not a bearer token"))
}

async fn authenticate(gateway: &Arc<Gateway>, headers: &HeaderMap) -> Result<TokenRecord> {
    let token_id = bearer_token(headers)?;
    gateway.validator.validate(&token_id).await
}

fn deadline_from_headers(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(DEADLINE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

// -- Views --

/// Server representation with secret-bearing env values masked.
fn redacted_server(record: &ServerRecord) -> Value {
    let mut view = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Some(env) = view.get_mut("env").and_then(Value::as_object_mut) {
        for value in env.values_mut() {
            *value = json!("[REDACTED]");
        }
    }
    view
}

/// Token metadata with the bearer secret shortened. Only `POST
/// /api/tokens` ever returns the full id.
fn token_view(token: &TokenRecord) -> Value {
    let mut view = serde_json::to_value(token).unwrap_or(Value::Null);
    view["id"] = json!(redact_token_id(&token.id));
    view
}

// -- Handlers --

async fn info(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    let servers = gateway.manager.list()?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "serverCount": servers.len(),
    })))
}

async fn list_servers(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let servers = gateway.manager.list()?;
    Ok(Json(Value::Array(
        servers.iter().map(redacted_server).collect(),
    )))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddServerBody {
    name: String,
    transport: mcpr_core::TransportKind,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    tool_permissions: HashMap<String, bool>,
}

async fn add_server(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(body): Json<AddServerBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    authenticate(&gateway, &headers).await?;
    let record = gateway.manager.add(NewServer {
        name: body.name,
        transport: body.transport,
        command: body.command,
        args: body.args,
        env: body.env,
        url: body.url,
        project_id: body.project_id,
        tool_permissions: body.tool_permissions,
    })?;
    Ok((StatusCode::CREATED, Json(redacted_server(&record))))
}

async fn get_server(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let record = gateway.manager.get(&id)?;
    let mut view = redacted_server(&record);
    view["recentStderr"] = json!(gateway.manager.recent_stderr(&id));
    Ok(Json(view))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateServerBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tool_permissions: Option<HashMap<String, bool>>,
}

async fn update_server(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateServerBody>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let record = gateway.manager.update(
        &id,
        ServerPatch {
            name: body.name,
            command: body.command,
            args: body.args,
            env: body.env,
            url: body.url,
            project_id: None,
            tool_permissions: body.tool_permissions,
        },
    )?;
    gateway.catalog.invalidate().await;
    Ok(Json(redacted_server(&record)))
}

async fn remove_server(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authenticate(&gateway, &headers).await?;
    gateway.manager.remove(&id).await?;
    gateway.catalog.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_server(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authenticate(&gateway, &headers).await?;
    gateway.manager.start(&id).await?;
    gateway.catalog.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_server(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authenticate(&gateway, &headers).await?;
    gateway.manager.stop(&id).await?;
    gateway.catalog.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn restart_server(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authenticate(&gateway, &headers).await?;
    gateway.manager.restart(&id).await?;
    gateway.catalog.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tools(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let tools = gateway.catalog.all_tools().await?;
    Ok(Json(serde_json::to_value(tools).map_err(RouterError::internal)?))
}

async fn server_tools(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let tools = gateway.catalog.tools_for_server(&id).await?;
    Ok(Json(serde_json::to_value(tools).map_err(RouterError::internal)?))
}

async fn server_resources(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let resources = gateway.manager.list_resources(&id).await?;
    Ok(Json(serde_json::to_value(resources).map_err(RouterError::internal)?))
}

#[derive(Deserialize)]
struct ReadResourceParams {
    uri: String,
}

async fn read_server_resource(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<ReadResourceParams>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let result = gateway.manager.read_resource(&id, &params.uri).await?;
    Ok(Json(serde_json::to_value(result).map_err(RouterError::internal)?))
}

async fn server_prompts(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let prompts = gateway.manager.list_prompts(&id).await?;
    Ok(Json(serde_json::to_value(prompts).map_err(RouterError::internal)?))
}

async fn get_server_prompt(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path((id, prompt)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let result = gateway.manager.get_prompt(&id, &prompt, None).await?;
    Ok(Json(serde_json::to_value(result).map_err(RouterError::internal)?))
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn search_tools(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let hits = gateway.catalog.search(&params.q, params.limit).await?;
    let body: Vec<Value> = hits
        .into_iter()
        .map(|(tool, score)| json!({"tool": tool, "score": score}))
        .collect();
    Ok(Json(Value::Array(body)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallBody {
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    project_id: Option<String>,
}

async fn call_by_exposed(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(exposed): Path<String>,
    Json(body): Json<CallBody>,
) -> ApiResult<Json<Value>> {
    let token_id = bearer_token(&headers)?;
    let response = pipeline::call_tool(
        &gateway,
        ToolCallRequest {
            token_id,
            exposed_name: exposed,
            arguments: body.arguments,
            project_id: body.project_id,
            deadline: deadline_from_headers(&headers),
        },
    )
    .await?;
    Ok(Json(serde_json::to_value(response).map_err(RouterError::internal)?))
}

async fn call_by_server(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path((id, tool)): Path<(String, String)>,
    Json(body): Json<CallBody>,
) -> ApiResult<Json<Value>> {
    let token_id = bearer_token(&headers)?;
    let record = gateway.manager.get(&id)?;
    let response = pipeline::call_tool(
        &gateway,
        ToolCallRequest {
            token_id,
            exposed_name: exposed_tool_name(&record.name, &tool),
            arguments: body.arguments,
            project_id: body.project_id,
            deadline: deadline_from_headers(&headers),
        },
    )
    .await?;
    Ok(Json(serde_json::to_value(response).map_err(RouterError::internal)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTokensParams {
    #[serde(default)]
    client_id: Option<String>,
}

async fn list_tokens(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Query(params): Query<ListTokensParams>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let tokens = gateway.tokens.list(params.client_id.as_deref())?;
    Ok(Json(Value::Array(tokens.iter().map(token_view).collect())))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenBody {
    client_id: String,
    name: String,
    #[serde(default)]
    ttl: Option<i64>,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    server_access: HashMap<String, bool>,
}

async fn create_token(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(body): Json<CreateTokenBody>,
) -> ApiResult<(StatusCode, Json<TokenRecord>)> {
    authenticate(&gateway, &headers).await?;
    // The only response that ever carries the full token id.
    let token = gateway
        .tokens
        .generate(GenerateOptions {
            client_id: body.client_id,
            name: body.name,
            ttl_secs: body.ttl,
            scopes: body.scopes,
            server_access: body.server_access,
            metadata: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(token)))
}

async fn revoke_token(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authenticate(&gateway, &headers).await?;
    gateway.tokens.revoke(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh_token(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let token = gateway.tokens.refresh(&id).await?;
    Ok(Json(token_view(&token)))
}

async fn list_policies(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let rules = gateway.policies.list(None, None)?;
    Ok(Json(serde_json::to_value(rules).map_err(RouterError::internal)?))
}

async fn add_policy(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(body): Json<NewRule>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    authenticate(&gateway, &headers).await?;
    let rule = gateway.policies.add(body)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(rule).map_err(RouterError::internal)?),
    ))
}

async fn get_policy(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let rule = gateway.policies.get(&id)?;
    Ok(Json(serde_json::to_value(rule).map_err(RouterError::internal)?))
}

async fn update_policy(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<NewRule>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let rule = gateway.policies.update(&id, body)?;
    Ok(Json(serde_json::to_value(rule).map_err(RouterError::internal)?))
}

async fn remove_policy(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authenticate(&gateway, &headers).await?;
    gateway.policies.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_approvals(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let pending = gateway.approvals.list();
    Ok(Json(serde_json::to_value(pending).map_err(RouterError::internal)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondBody {
    approved: bool,
    responded_by: String,
    #[serde(default)]
    note: Option<String>,
}

async fn respond_approval(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RespondBody>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;
    let settled = gateway
        .approvals
        .respond(&id, body.approved, &body.responded_by, body.note)?;
    Ok(Json(serde_json::to_value(settled).map_err(RouterError::internal)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditParams {
    #[serde(rename = "type")]
    event_type: Option<String>,
    client_id: Option<String>,
    server_id: Option<String>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    cursor: Option<i64>,
    #[serde(default)]
    dir: Option<String>,
    limit: Option<usize>,
}

async fn query_audit(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Query(params): Query<AuditParams>,
) -> ApiResult<Json<Value>> {
    authenticate(&gateway, &headers).await?;

    let filter = AuditFilter {
        event_type: params.event_type,
        client_id: params.client_id,
        server_id: params.server_id,
        start_time: params.start_time,
        end_time: params.end_time,
        limit: None,
        offset: None,
    };
    let order = match params.dir.as_deref() {
        Some("asc") => OrderDir::Asc,
        _ => OrderDir::Desc,
    };
    let page = gateway
        .store
        .audit()
        .query_paginated(&filter, params.cursor, order, params.limit)?;
    Ok(Json(serde_json::to_value(page).map_err(RouterError::internal)?))
}

async fn event_stream(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = std::result::Result<Event, axum::Error>>>> {
    authenticate(&gateway, &headers).await?;
    let stream = BroadcastStream::new(gateway.events.subscribe())
        .filter_map(|item| item.ok().map(|event| Event::default().json_data(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod http_tests;
