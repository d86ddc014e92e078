//! HTTP/JSON translation of the gRPC surface.
//!
//! Same handlers, same store calls, axum instead of tonic. Response codes
//! follow the fixed mapping: invalid expression 422, not found 404, already
//! exists 409, bad credentials 412, submit 201.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::AuthenticatedUser;
use crate::compiler;
use crate::store::models::{Expression, Task, TaskOutcome};
use crate::store::StoreError;

use super::AppState;

pub fn router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/api/v1/calculate", post(calculate))
        .route("/api/v1/expressions", get(list_expressions))
        .route("/api/v1/expressions/:id", get(get_expression))
        .route("/api/v1/expressions/:id/tasks", get(list_expression_tasks))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/api/v1/register", post(register))
        .route("/api/v1/login", post(login))
        .route("/internal/v1/task", get(fetch_task).post(submit_task_result))
        .merge(user_routes)
        .layer(middleware::from_fn(record_request_metrics))
        .with_state(state)
}

/// Request counter and latency histogram, labeled by route template rather
/// than concrete path so task and expression ids do not explode cardinality.
async fn record_request_metrics(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |path| path.as_str().to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let labels = [
        ("endpoint", endpoint),
        ("method", method),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("tally_http_requests_total", &labels).increment(1);
    metrics::histogram!("tally_http_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
    response
}

#[derive(Debug)]
struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthenticated(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserExists => Self::new(StatusCode::CONFLICT, "user exists"),
            StoreError::UserNotFound => {
                Self::new(StatusCode::PRECONDITION_FAILED, "bad login or password")
            }
            StoreError::ExpressionNotFound => {
                Self::new(StatusCode::NOT_FOUND, "expression not found")
            }
            StoreError::TaskNotFound => Self::new(StatusCode::NOT_FOUND, "task not found"),
            StoreError::NoPendingTasks => Self::new(StatusCode::NOT_FOUND, "no pending tasks"),
            StoreError::Database(_) | StoreError::Migrate(_) => {
                error!(error = %err, "store operation failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| HttpError::unauthenticated("missing auth token"))?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or_else(|| HttpError::unauthenticated("missing bearer token"))?;

    let claims = state
        .auth
        .verify_token(token)
        .map_err(|_| HttpError::unauthenticated("invalid auth token"))?;

    request.extensions_mut().insert(AuthenticatedUser {
        id: claims.sub,
        login: claims.login,
    });
    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CredentialsBody {
    login: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponseBody {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CalculateBody {
    expression: String,
}

#[derive(Debug, Serialize)]
struct CalculateResponseBody {
    id: String,
}

#[derive(Debug, Serialize)]
struct ExpressionBody {
    id: String,
    expression: String,
    status: &'static str,
    result: Option<f64>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Expression> for ExpressionBody {
    fn from(expression: &Expression) -> Self {
        Self {
            id: expression.id.clone(),
            expression: expression.expression.clone(),
            status: expression.status.as_str(),
            result: expression.result,
            error: expression.error.clone(),
            created_at: expression.created_at,
            updated_at: expression.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExpressionListBody {
    expressions: Vec<ExpressionBody>,
}

#[derive(Debug, Serialize)]
struct TaskBody {
    id: String,
    expression_id: String,
    parent_task_1_id: Option<String>,
    parent_task_2_id: Option<String>,
    arg1: Option<f64>,
    arg2: Option<f64>,
    operation: &'static str,
    operation_time_ms: i64,
    status: &'static str,
    result: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskBody {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            expression_id: task.expression_id.clone(),
            parent_task_1_id: task.parent_task_1_id.clone(),
            parent_task_2_id: task.parent_task_2_id.clone(),
            arg1: task.arg1,
            arg2: task.arg2,
            operation: task.operation.as_str(),
            operation_time_ms: task.operation_time_ms,
            status: task.status.as_str(),
            result: task.result,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct TaskListBody {
    tasks: Vec<TaskBody>,
}

#[derive(Debug, Serialize)]
struct AgentTaskBody {
    id: String,
    operation: &'static str,
    arg1: f64,
    arg2: f64,
    operation_time_ms: i64,
}

/// JSON cannot carry IEEE NaN, so the non-finite sentinel travels as null.
#[derive(Debug, Deserialize)]
struct SubmitTaskResultBody {
    id: String,
    result: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn register(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Json<serde_json::Value>, HttpError> {
    state
        .store
        .create_user(&body.login, &crate::auth::digest_password(&body.password))
        .await?;
    Ok(Json(serde_json::json!({})))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Json<LoginResponseBody>, HttpError> {
    let user = state
        .store
        .get_user(&body.login, &crate::auth::digest_password(&body.password))
        .await?;
    let access_token = state.auth.mint_token(&user.id, &user.login).map_err(|err| {
        error!(error = %err, "token minting failed");
        HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })?;
    Ok(Json(LoginResponseBody { access_token }))
}

async fn calculate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CalculateBody>,
) -> Result<(StatusCode, Json<CalculateResponseBody>), HttpError> {
    let plan = compiler::compile(&body.expression).map_err(|_| {
        HttpError::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid expression")
    })?;
    let cmd = super::plan_to_cmd(&body.expression, plan, &state.config);

    let id = state.store.create_expression(&user.id, cmd).await?;
    Ok((StatusCode::CREATED, Json(CalculateResponseBody { id })))
}

async fn list_expressions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<ExpressionListBody>, HttpError> {
    let expressions = state.store.list_expressions(&user.id).await?;
    Ok(Json(ExpressionListBody {
        expressions: expressions.iter().map(ExpressionBody::from).collect(),
    }))
}

async fn get_expression(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<ExpressionBody>, HttpError> {
    let expression = state.store.get_expression(&user.id, &id).await?;
    Ok(Json(ExpressionBody::from(&expression)))
}

async fn list_expression_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<TaskListBody>, HttpError> {
    let tasks = state.store.list_expression_tasks(&user.id, &id).await?;
    Ok(Json(TaskListBody {
        tasks: tasks.iter().map(TaskBody::from).collect(),
    }))
}

async fn fetch_task(State(state): State<AppState>) -> Result<Json<AgentTaskBody>, HttpError> {
    let task = state.store.claim_pending_task().await?;
    Ok(Json(AgentTaskBody {
        id: task.id.clone(),
        operation: task.operation.as_str(),
        arg1: task.arg1.unwrap_or(f64::NAN),
        arg2: task.arg2.unwrap_or(f64::NAN),
        operation_time_ms: task.operation_time_ms,
    }))
}

async fn submit_task_result(
    State(state): State<AppState>,
    Json(body): Json<SubmitTaskResultBody>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let outcome = match body.result {
        Some(value) if value.is_finite() => TaskOutcome::Completed(value),
        _ => TaskOutcome::Failed,
    };
    state.store.finish_task(&body.id, outcome).await?;
    Ok(Json(serde_json::json!({})))
}
