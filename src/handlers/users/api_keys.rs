use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::Principal;
use crate::models::{ApiKey, AuditAction};
use crate::util::AuditLogBuilder;

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyBody {
    #[serde(default = "default_key_name")]
    pub name: String,
}

fn default_key_name() -> String {
    "default".into()
}

/// The full key is only ever returned here.
#[derive(Debug, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub key: ApiKey,
    pub api_key: String,
}

pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(input): Json<CreateApiKeyBody>,
) -> Result<Json<CreatedApiKey>> {
    principal.require_self_or_admin(&user_id, msg::USER_NOT_FOUND)?;
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }

    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;
    queries::get_user_by_id(&conn, &user_id)?.or_not_found(msg::USER_NOT_FOUND)?;

    let (key, api_key) = queries::create_api_key(&conn, &user_id, name)?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::CreateApiKey)
        .resource("api_key", &key.id)
        .details(&serde_json::json!({ "user_id": user_id, "name": name, "prefix": key.prefix }))
        .save()?;

    Ok(Json(CreatedApiKey { key, api_key }))
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ApiKey>>> {
    principal.require_self_or_admin(&user_id, msg::USER_NOT_FOUND)?;
    let conn = state.db.get()?;
    queries::get_user_by_id(&conn, &user_id)?.or_not_found(msg::USER_NOT_FOUND)?;
    Ok(Json(queries::list_api_keys(&conn, &user_id)?))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path((user_id, key_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    principal.require_self_or_admin(&user_id, msg::USER_NOT_FOUND)?;
    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    if !queries::revoke_api_key(&conn, &user_id, &key_id)? {
        return Err(AppError::NotFound("API key not found".into()));
    }

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::RevokeApiKey)
        .resource("api_key", &key_id)
        .details(&serde_json::json!({ "user_id": user_id }))
        .save()?;

    Ok(Json(serde_json::json!({ "success": true })))
}
