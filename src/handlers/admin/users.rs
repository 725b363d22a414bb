use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::Principal;
use crate::models::{AuditAction, CreateUser, User};
use crate::pagination::{Paginated, PaginationQuery};
use crate::util::AuditLogBuilder;

pub async fn create_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(input): Json<CreateUser>,
) -> Result<Json<User>> {
    input.validate()?;

    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;
    let user = queries::create_user(&conn, &input)?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::CreateUser)
        .resource("user", &user.id)
        .details(&serde_json::json!({
            "name": user.name,
            "country": user.country,
            "role": user.role.as_ref(),
        }))
        .save()?;

    Ok(Json(user))
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<User>>> {
    let conn = state.db.get()?;
    let (users, total) = queries::list_users_paginated(&conn, query.limit(), query.offset())?;
    Ok(Json(Paginated::from_query(users, total, &query)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<User>> {
    let conn = state.db.get()?;
    let user = queries::get_user_by_id(&conn, &user_id)?.or_not_found(msg::USER_NOT_FOUND)?;
    Ok(Json(user))
}
