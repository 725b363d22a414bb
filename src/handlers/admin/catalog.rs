use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::Principal;
use crate::models::{
    AuditAction, CatalogInclusion, CatalogItem, CreateCatalogItem, UpdateCatalogItem, UserRole,
};
use crate::util::AuditLogBuilder;

pub async fn create_catalog_item(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(input): Json<CreateCatalogItem>,
) -> Result<Json<CatalogItem>> {
    input.validate()?;

    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    if let Some(creator_id) = &input.creator_id {
        let creator = queries::get_user_by_id(&conn, creator_id)?.or_not_found(msg::USER_NOT_FOUND)?;
        if creator.role != UserRole::Creator {
            return Err(AppError::BadRequest(format!("user {} is not a creator", creator_id)));
        }
    }

    let item = queries::create_catalog_item(&conn, &input)?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::CreateCatalogItem)
        .resource("catalog_item", &item.id)
        .details(&serde_json::json!({
            "kind": item.kind.as_ref(),
            "title": item.title,
            "creator_id": item.creator_id,
        }))
        .save()?;

    Ok(Json(item))
}

pub async fn update_catalog_item(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Json(input): Json<UpdateCatalogItem>,
) -> Result<Json<CatalogItem>> {
    input.validate()?;

    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;
    let item = queries::update_catalog_item(&conn, &item_id, &input)?.or_not_found(msg::ITEM_NOT_FOUND)?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::UpdateCatalogItem)
        .resource("catalog_item", &item.id)
        .details(&serde_json::json!({
            "title": input.title,
            "price": input.price,
            "currency": input.currency,
            "video_url_changed": input.video_url.is_some(),
        }))
        .save()?;

    Ok(Json(item))
}

/// `POST /admin/catalog/{item_id}/inclusions`: the item (a plan or bundle) now
/// grants `child_id` too.
pub async fn add_inclusion(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(parent_id): Path<String>,
    Json(input): Json<CatalogInclusionBody>,
) -> Result<Json<CatalogInclusion>> {
    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    let parent = queries::get_catalog_item(&conn, &parent_id)?.or_not_found(msg::ITEM_NOT_FOUND)?;
    let child = queries::get_catalog_item(&conn, &input.child_id)?.or_not_found(msg::ITEM_NOT_FOUND)?;
    if !parent.kind.can_include() {
        return Err(AppError::BadRequest(format!(
            "a {} cannot include other items",
            parent.kind.as_ref()
        )));
    }
    if child.kind.is_plan() {
        return Err(AppError::BadRequest("plans cannot be included in other items".into()));
    }
    if queries::inclusion_creates_cycle(&conn, &parent.id, &child.id)? {
        return Err(AppError::BadRequest("inclusion would create a cycle".into()));
    }

    if queries::add_catalog_inclusion(&conn, &parent.id, &child.id)? {
        AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
            .actor(principal.actor_type(), Some(&principal.user.id))
            .action(AuditAction::AddInclusion)
            .resource("catalog_item", &parent.id)
            .details(&serde_json::json!({ "child_id": child.id }))
            .save()?;
    }

    Ok(Json(CatalogInclusion {
        parent_id: parent.id,
        child_id: child.id,
    }))
}

pub async fn remove_inclusion(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path((parent_id, child_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    if !queries::remove_catalog_inclusion(&conn, &parent_id, &child_id)? {
        return Err(AppError::NotFound("Inclusion not found".into()));
    }

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::RemoveInclusion)
        .resource("catalog_item", &parent_id)
        .details(&serde_json::json!({ "child_id": child_id }))
        .save()?;

    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, serde::Deserialize)]
pub struct CatalogInclusionBody {
    pub child_id: String,
}
