use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::error::Error;
use crate::models::*;

#[derive(Debug, Deserialize)]
pub struct InstantiateInput {
    pub proto_id: String,
    #[serde(default)]
    pub vars: Bindings,
    /// Bond onto this existing task instead of pouring a fresh root.
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseInput {
    #[serde(default)]
    pub mode: CloseMode,
}

#[derive(Debug, Deserialize)]
pub struct SquashInput {
    pub summary: String,
}

#[derive(Debug, Deserialize)]
pub struct AttachInput {
    pub molecule_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListInstancesQuery {
    pub kind: Option<String>,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Map a workflow error to a status. Store failures are logged and hidden
/// behind a generic message; everything else is safe to show the client.
fn workflow_error(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Template(_) | Error::MissingVariable(_) | Error::NotAWisp(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::AlreadyClosed(_) | Error::InstanceClosed(_) | Error::StepNotReady { .. } => {
            StatusCode::CONFLICT
        }
        Error::Transport(_) => return internal_error(e),
    };
    tracing::warn!("Request rejected: {}", e);
    (status, e.to_string())
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Formulas
// ============================================================

pub async fn list_formulas(State(engine): State<AppState>) -> Json<Vec<String>> {
    Json(engine.formulas().names().map(str::to_string).collect())
}

pub async fn cook_formula(
    State(engine): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<Protomolecule>)> {
    engine
        .cook(&name)
        .map(|p| (StatusCode::CREATED, Json(p)))
        .map_err(workflow_error)
}

pub async fn list_protomolecules(
    State(engine): State<AppState>,
) -> ApiResult<Json<Vec<Protomolecule>>> {
    engine
        .store()
        .list_protomolecules()
        .map(Json)
        .map_err(internal_error)
}

pub async fn get_protomolecule(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Protomolecule>> {
    engine.protomolecule(&id).map(Json).map_err(workflow_error)
}

// ============================================================
// Instances
// ============================================================

pub async fn pour_molecule(
    State(engine): State<AppState>,
    Json(input): Json<InstantiateInput>,
) -> ApiResult<(StatusCode, Json<Progress>)> {
    let result = match input.parent_id {
        Some(ref parent) => engine.bond(&input.proto_id, &input.vars, parent),
        None => engine.pour(&input.proto_id, &input.vars),
    };
    result
        .map(|p| (StatusCode::CREATED, Json(p)))
        .map_err(workflow_error)
}

pub async fn create_wisp(
    State(engine): State<AppState>,
    Json(input): Json<InstantiateInput>,
) -> ApiResult<(StatusCode, Json<Progress>)> {
    if input.parent_id.is_some() {
        return Err((
            StatusCode::BAD_REQUEST,
            "wisps cannot be bonded to a parent".to_string(),
        ));
    }
    engine
        .wisp(&input.proto_id, &input.vars)
        .map(|p| (StatusCode::CREATED, Json(p)))
        .map_err(workflow_error)
}

pub async fn list_instances(
    State(engine): State<AppState>,
    Query(query): Query<ListInstancesQuery>,
) -> ApiResult<Json<Vec<Instance>>> {
    let kind = match query.kind.as_deref() {
        Some(k) => Some(InstanceKind::from_str(k).ok_or((
            StatusCode::BAD_REQUEST,
            format!("unknown instance kind '{}'", k),
        ))?),
        None => None,
    };
    engine
        .store()
        .list_instances(kind)
        .map(Json)
        .map_err(internal_error)
}

pub async fn get_progress(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Progress>> {
    engine.progress(&id).map(Json).map_err(workflow_error)
}

pub async fn squash_instance(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<SquashInput>,
) -> ApiResult<(StatusCode, Json<Digest>)> {
    engine
        .squash(&id, &input.summary)
        .map(|d| (StatusCode::CREATED, Json(d)))
        .map_err(workflow_error)
}

pub async fn burn_wisp(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    engine
        .burn(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(workflow_error)
}

pub async fn list_instance_digests(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Digest>>> {
    engine
        .store()
        .get_digests_for_instance(&id)
        .map(Json)
        .map_err(internal_error)
}

// ============================================================
// Steps
// ============================================================

pub async fn start_step(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Step>> {
    engine.start(&id).map(Json).map_err(workflow_error)
}

pub async fn close_step(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    input: Option<Json<CloseInput>>,
) -> ApiResult<Json<CloseOutcome>> {
    let mode = input.map(|Json(i)| i.mode).unwrap_or_default();
    engine.close(&id, mode).map(Json).map_err(workflow_error)
}

// ============================================================
// Digests
// ============================================================

pub async fn get_digest(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Digest>> {
    engine
        .store()
        .get_digest(id)
        .map_err(internal_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Digest not found".to_string()))
}

// ============================================================
// Agent contexts
// ============================================================

pub async fn agent_current(
    State(engine): State<AppState>,
    Path(agent): Path<String>,
) -> ApiResult<Json<Progress>> {
    let ctx = engine
        .store()
        .load_agent_context(&agent)
        .map_err(internal_error)?;
    engine.current(&ctx, None).map(Json).map_err(workflow_error)
}

pub async fn get_attachment(
    State(engine): State<AppState>,
    Path(agent): Path<String>,
) -> ApiResult<Json<AgentContext>> {
    engine
        .store()
        .load_agent_context(&agent)
        .map(Json)
        .map_err(internal_error)
}

pub async fn attach(
    State(engine): State<AppState>,
    Path(agent): Path<String>,
    Json(input): Json<AttachInput>,
) -> ApiResult<Json<AgentContext>> {
    let mut ctx = engine
        .store()
        .load_agent_context(&agent)
        .map_err(internal_error)?;
    engine
        .attach(&mut ctx, &input.molecule_id)
        .map_err(workflow_error)?;
    engine
        .store()
        .save_agent_context(&ctx)
        .map_err(internal_error)?;
    Ok(Json(ctx))
}

pub async fn detach(
    State(engine): State<AppState>,
    Path(agent): Path<String>,
) -> ApiResult<Json<AgentContext>> {
    let mut ctx = engine
        .store()
        .load_agent_context(&agent)
        .map_err(internal_error)?;
    engine.detach(&mut ctx);
    engine
        .store()
        .save_agent_context(&ctx)
        .map_err(internal_error)?;
    Ok(Json(ctx))
}
