use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::media;
use crate::middleware::Principal;
use crate::models::{AuditAction, CatalogItem, CreateProcessingJob, ProcessingJob};
use crate::util::AuditLogBuilder;

/// The owning creator or an admin; everyone else sees the item as missing.
fn load_owned_item(state: &AppState, principal: &Principal, item_id: &str) -> Result<CatalogItem> {
    let conn = state.db.get()?;
    let item = queries::get_catalog_item(&conn, item_id)?.or_not_found(msg::ITEM_NOT_FOUND)?;
    let owns = item.creator_id.as_deref() == Some(principal.user.id.as_str());
    if !(principal.is_admin() || owns) {
        return Err(AppError::NotFound(msg::ITEM_NOT_FOUND.into()));
    }
    Ok(item)
}

pub async fn start_processing(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Json(input): Json<CreateProcessingJob>,
) -> Result<Json<ProcessingJob>> {
    let item = load_owned_item(&state, &principal, &item_id)?;
    let job = media::start_processing(&state, &item.id, &input).await?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::StartProcessing)
        .resource("processing_job", &job.id)
        .details(&serde_json::json!({
            "item_id": item.id,
            "external_job_id": job.external_job_id,
            "operations": job.operations.len(),
        }))
        .save()?;

    Ok(Json(job))
}

pub async fn list_processing_jobs(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(item_id): Path<String>,
) -> Result<Json<Vec<ProcessingJob>>> {
    load_owned_item(&state, &principal, &item_id)?;
    let conn = state.db.get()?;
    Ok(Json(queries::list_processing_jobs_for_item(&conn, &item_id)?))
}

/// Returns the job after one refresh attempt, so callers polling this endpoint
/// see progress even between background poller runs.
pub async fn get_processing_job(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((item_id, job_id)): Path<(String, String)>,
) -> Result<Json<ProcessingJob>> {
    load_owned_item(&state, &principal, &item_id)?;
    let job = {
        let conn = state.db.get()?;
        queries::get_processing_job(&conn, &job_id)?
            .filter(|j| j.item_id == item_id)
            .or_not_found(msg::JOB_NOT_FOUND)?
    };
    Ok(Json(media::refresh_job(&state, job, queries::now()).await?))
}
