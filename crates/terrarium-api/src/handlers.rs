use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use terrarium_domain::{RequestId, TerrariumId, TerrariumInfo};
use terrarium_runner::ExecMode;

use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

type ApiResult = Result<Json<ApiResponse>, ApiError>;

/// Message used when the real payload is the tool output in `detail`.
const SEE_DETAIL: &str = "refer to the detail";

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn readyz(State(state): State<AppState>) -> ApiResult {
    if !state.is_ready() {
        return Err(ApiError::unavailable("terrarium is not ready"));
    }
    Ok(Json(ApiResponse::success("terrarium is ready")))
}

pub async fn tofu_version(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
) -> ApiResult {
    let out = state.service.tofu_version(&req).await?;
    Ok(Json(ApiResponse::success(out.trim().to_string())))
}

// ── Terrarium records ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IssueBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub async fn issue_terrarium(
    State(state): State<AppState>,
    Json(body): Json<IssueBody>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let mut info = TerrariumInfo::new(body.name);
    info.description = body.description;

    let info = state.service.issue(info).await?;
    let resp = ApiResponse::success(format!("terrarium (trId: {}) issued", info.id))
        .with_object(json!(info));
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn list_terrariums(State(state): State<AppState>) -> ApiResult {
    let all = state.service.list().await?;
    let msg = format!("{} terrarium(s)", all.len());
    Ok(Json(ApiResponse::success(msg).with_object(json!(all))))
}

pub async fn get_terrarium(
    State(state): State<AppState>,
    Path(tr_id): Path<String>,
) -> ApiResult {
    let info = state.service.get(&TerrariumId::new(tr_id)).await?;
    Ok(Json(
        ApiResponse::success(format!("terrarium (trId: {})", info.id)).with_object(json!(info)),
    ))
}

pub async fn erase_terrarium(
    State(state): State<AppState>,
    Path(tr_id): Path<String>,
) -> ApiResult {
    let id = TerrariumId::new(tr_id);
    state.service.erase(&id).await?;
    Ok(Json(ApiResponse::success(format!(
        "terrarium (trId: {id}) erased"
    ))))
}

#[derive(Debug, Deserialize)]
pub struct EnrichmentsBody {
    pub enrichments: String,
    #[serde(default)]
    pub providers: Vec<String>,
}

pub async fn set_enrichments(
    State(state): State<AppState>,
    Path(tr_id): Path<String>,
    Json(body): Json<EnrichmentsBody>,
) -> ApiResult {
    let id = TerrariumId::new(tr_id);
    let mut info = state.service.set_enrichments(&id, &body.enrichments).await?;
    if !body.providers.is_empty() {
        info = state.service.set_providers(&id, &body.providers).await?;
    }
    Ok(Json(
        ApiResponse::success(format!(
            "terrarium (trId: {id}) enriched with {}",
            info.enrichments
        ))
        .with_object(json!(info)),
    ))
}

pub async fn put_tfvars(
    State(state): State<AppState>,
    Path(tr_id): Path<String>,
    Json(vars): Json<Value>,
) -> ApiResult {
    if !vars.is_object() {
        return Err(ApiError::bad_request("tfvars must be a JSON object"));
    }
    let id = TerrariumId::new(tr_id);
    let path = state.service.write_tfvars(&id, &vars).await?;
    Ok(Json(ApiResponse::success(format!(
        "tfvars written to {}",
        path.display()
    ))))
}

pub async fn empty_out_env(
    State(state): State<AppState>,
    Path(tr_id): Path<String>,
) -> ApiResult {
    let id = TerrariumId::new(tr_id);
    state.service.empty_out(&id).await?;
    Ok(Json(ApiResponse::success(format!(
        "the terrarium environment (trId: {id}) is emptied out"
    ))))
}

// ── Actions ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ModeQuery {
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

impl ModeQuery {
    fn mode(&self) -> ExecMode {
        if self.run_async {
            ExecMode::Async
        } else {
            ExecMode::Sync
        }
    }
}

fn tool_output(out: String) -> Json<ApiResponse> {
    Json(ApiResponse::success(SEE_DETAIL).with_detail(out))
}

pub async fn init(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
) -> ApiResult {
    let out = state.service.init(&TerrariumId::new(tr_id), &req).await?;
    Ok(tool_output(out))
}

pub async fn plan(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
) -> ApiResult {
    let out = state.service.plan(&TerrariumId::new(tr_id), &req).await?;
    Ok(tool_output(out))
}

pub async fn refresh(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
) -> ApiResult {
    let out = state.service.refresh(&TerrariumId::new(tr_id), &req).await?;
    Ok(tool_output(out))
}

pub async fn apply(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
    Query(q): Query<ModeQuery>,
) -> ApiResult {
    let out = state
        .service
        .apply(&TerrariumId::new(tr_id), &req, q.mode())
        .await?;
    Ok(match q.mode() {
        ExecMode::Async => Json(ApiResponse::success(out)),
        ExecMode::Sync => tool_output(out),
    })
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
    Query(q): Query<ModeQuery>,
) -> ApiResult {
    let out = state
        .service
        .destroy(&TerrariumId::new(tr_id), &req, q.mode())
        .await?;
    Ok(match q.mode() {
        ExecMode::Async => Json(ApiResponse::success(out)),
        ExecMode::Sync => tool_output(out),
    })
}

#[derive(Debug, Deserialize)]
pub struct DetachBody {
    pub address: String,
}

pub async fn detach_resource(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
    Json(body): Json<DetachBody>,
) -> ApiResult {
    if body.address.trim().is_empty() {
        return Err(ApiError::bad_request("address is required"));
    }
    let out = state
        .service
        .detach_resource(&TerrariumId::new(tr_id), &req, &body.address)
        .await?;
    Ok(tool_output(out))
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputQuery {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub json: bool,
}

pub async fn output(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
    Query(q): Query<OutputQuery>,
) -> ApiResult {
    let out = state
        .service
        .output(&TerrariumId::new(tr_id), &req, &q.name, q.json)
        .await?;
    Ok(json_or_text(out, q.json))
}

#[derive(Debug, Default, Deserialize)]
pub struct ShowQuery {
    #[serde(default)]
    pub json: bool,
}

pub async fn show(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
    Query(q): Query<ShowQuery>,
) -> ApiResult {
    let out = state
        .service
        .show(&TerrariumId::new(tr_id), &req, q.json)
        .await?;
    Ok(json_or_text(out, q.json))
}

/// JSON output goes into `object` when it parses; anything else stays text.
fn json_or_text(out: String, json: bool) -> Json<ApiResponse> {
    if json {
        if let Ok(value) = serde_json::from_str::<Value>(&out) {
            return Json(ApiResponse::success("output").with_object(value));
        }
    }
    tool_output(out)
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourceInfoQuery {
    pub target: Option<String>,
}

pub async fn resource_info(
    State(state): State<AppState>,
    Extension(req): Extension<RequestId>,
    Path(tr_id): Path<String>,
    Query(q): Query<ResourceInfoQuery>,
) -> ApiResult {
    let id = TerrariumId::new(tr_id);
    let merged = state
        .service
        .resource_info(&id, &req, q.target.as_deref())
        .await?;
    Ok(Json(
        ApiResponse::success(format!("resource info (trId: {id})"))
            .with_object(Value::Object(merged)),
    ))
}

/// Log of one request, prefixed with the terrarium's current run status.
///
/// Status is kept per terrarium, not per request. `output`/`show` requests
/// write a log but no status, so their report carries whatever the last
/// state-changing run recorded, or 404 if nothing ever did.
pub async fn request_status(
    State(state): State<AppState>,
    Path((tr_id, request_id)): Path<(String, String)>,
) -> ApiResult {
    let report = state
        .service
        .history(&TerrariumId::new(tr_id), &RequestId::new(request_id))
        .await?;
    Ok(tool_output(report))
}
