//! Axum server and routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hr_audit::{AuditEntry, AuditLedger, AuditQuery, AuditStoreError, RetentionError, RetentionReport};
use hr_gateway::{AiDomain, AiGateway, AuditContext, CallOptions, GatewayError, SharedSettings};
use hr_tasks::{Task, TaskError, TaskExecutor, TaskKind, TaskStatus};
use hr_trust::{Actor, TrustWrapper, TrustedResponse, WrapRequest};
use hr_types::BaseResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an HR analysis assistant. Respond in valid JSON only, including a \"confidence\" field between 0 and 1.";

pub struct AppState {
    pub gateway: AiGateway,
    pub trust: TrustWrapper,
    pub ledger: AuditLedger,
    pub executor: TaskExecutor,
    pub settings: Arc<SharedSettings>,
    pub retention_days: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Audit(#[from] AuditStoreError),
    #[error(transparent)]
    Retention(#[from] RetentionError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) | ApiError::Retention(RetentionError::InvalidHorizon) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Gateway(e @ GatewayError::Parse(_)) => (StatusCode::BAD_GATEWAY, e.error_code()),
            ApiError::Gateway(e) => (StatusCode::SERVICE_UNAVAILABLE, e.error_code()),
            ApiError::Task(_) | ApiError::Audit(_) | ApiError::Retention(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }
        let body = BaseResponse::<()>::error(i32::from(status.as_u16()), code, self.to_string());
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<BaseResponse<T>>, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ai/analyze", post(handle_analyze))
        .route("/tasks", post(handle_enqueue).get(handle_list_tasks))
        .route("/tasks/:id", get(handle_get_task))
        .route("/audit/logs", get(handle_audit_list))
        .route("/audit/logs/:id", get(handle_audit_get))
        .route("/admin/retention/purge", post(handle_retention_purge))
        .route("/admin/kill-switch", post(handle_kill_switch))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub organization_id: i64,
    pub content: String,
    #[serde(default)]
    pub actor_id: Option<i64>,
    #[serde(default)]
    pub actor_role: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<i64>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

async fn handle_analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<TrustedResponse> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }
    let domain = match req.domain.as_deref() {
        Some(d) => d.parse::<AiDomain>().map_err(ApiError::BadRequest)?,
        None => AiDomain::General,
    };
    let request_id = req
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut opts = CallOptions::new(domain)
        .organization(req.organization_id)
        .audit(AuditContext {
            request_id: Some(request_id.clone()),
        });
    if let Some(t) = req.temperature {
        opts = opts.temperature(t);
    }
    let system_prompt = req.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let answer = state
        .gateway
        .analyze_with_model(system_prompt, &req.content, opts)
        .await?;

    let confidence = answer
        .value
        .get("confidence")
        .or_else(|| answer.value.get("confidence_score"))
        .and_then(Value::as_f64)
        .unwrap_or(0.5);
    let actor = Actor::new(
        req.organization_id,
        req.actor_id,
        req.actor_role.unwrap_or_else(|| "system".to_string()),
    )
    .with_request_id(request_id);
    let mut wrap = WrapRequest::new(
        answer.value,
        req.action_type.unwrap_or_else(|| format!("{}_analysis", domain)),
        req.entity_type.unwrap_or_else(|| domain.to_string()),
    )
    .confidence(confidence)
    .model(answer.model)
    .answered_by_fallback_model(answer.used_fallback_model);
    if let Some(id) = req.entity_id {
        wrap = wrap.entity(id);
    }
    Ok(Json(BaseResponse::ok(state.trust.wrap(&actor, wrap).await)))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
    pub organization_id: i64,
}

async fn handle_enqueue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<Task> {
    let kind: TaskKind = req.task_type.parse().map_err(ApiError::BadRequest)?;
    if !state.executor.is_registered(kind) {
        return Err(ApiError::BadRequest(format!("No handler for type {}", kind)));
    }
    let payload = if req.payload.is_null() {
        Value::Object(Default::default())
    } else {
        req.payload
    };
    let task = state
        .executor
        .enqueue(kind, payload, req.organization_id)
        .await?;
    Ok(Json(BaseResponse::ok(task)))
}

#[derive(Debug, Deserialize)]
pub struct OrgQuery {
    pub organization_id: i64,
}

async fn handle_get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<OrgQuery>,
) -> ApiResult<Task> {
    match state.executor.get(q.organization_id, &id).await? {
        Some(task) => Ok(Json(BaseResponse::ok(task))),
        None => Err(ApiError::NotFound(format!("task not found: {}", id))),
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub organization_id: i64,
    #[serde(default)]
    pub status: Option<String>,
}

async fn handle_list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TaskListQuery>,
) -> ApiResult<Vec<Task>> {
    let status = q
        .status
        .as_deref()
        .map(|s| s.to_ascii_uppercase().parse::<TaskStatus>())
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let tasks = state.executor.list(q.organization_id, status).await?;
    Ok(Json(BaseResponse::ok(tasks)))
}

async fn handle_audit_list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AuditQuery>,
) -> ApiResult<Vec<AuditEntry>> {
    let entries = state.ledger.query(&q).await?;
    Ok(Json(BaseResponse::ok(entries)))
}

async fn handle_audit_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<OrgQuery>,
) -> ApiResult<AuditEntry> {
    match state.ledger.get(q.organization_id, &id).await? {
        Some(entry) => Ok(Json(BaseResponse::ok(entry))),
        None => Err(ApiError::NotFound(format!("audit entry not found: {}", id))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    #[serde(default)]
    pub retention_days: Option<u32>,
}

async fn handle_retention_purge(
    State(state): State<Arc<AppState>>,
    body: Option<Json<PurgeRequest>>,
) -> ApiResult<RetentionReport> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let days = req.retention_days.unwrap_or(state.retention_days);
    let report = state.ledger.purge_older_than(days).await?;
    Ok(Json(BaseResponse::ok(report)))
}

#[derive(Debug, Deserialize)]
pub struct KillSwitchRequest {
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct KillSwitchState {
    pub kill_switch: bool,
}

async fn handle_kill_switch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KillSwitchRequest>,
) -> ApiResult<KillSwitchState> {
    state.settings.set_kill_switch(req.active);
    Ok(Json(BaseResponse::ok(KillSwitchState {
        kill_switch: state.settings.kill_switch_active(),
    })))
}

async fn handle_health() -> &'static str {
    "ok"
}
