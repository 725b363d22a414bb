use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Path, Query};
use crate::middleware::Principal;
use crate::models::{AuditAction, CreatePayout, PayoutRequest, PayoutStatus};
use crate::pagination::{Paginated, PaginationQuery};
use crate::payouts;
use crate::util::AuditLogBuilder;

#[derive(Debug, Deserialize)]
pub struct PayoutListQuery {
    #[serde(flatten)]
    pub pagination: PaginationQuery,
    pub status: Option<PayoutStatus>,
}

pub async fn create_payout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(creator_id): Path<String>,
    Json(input): Json<CreatePayout>,
) -> Result<Json<PayoutRequest>> {
    principal.require_creator_or_admin(&creator_id)?;
    let mut conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    let payout = payouts::submit(&mut conn, &creator_id, &input, queries::now())?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::SubmitPayout)
        .resource("payout", &payout.id)
        .details(&serde_json::json!({
            "creator_id": creator_id,
            "amount": payout.amount,
            "currency": payout.currency,
            "payment_method": payout.payment_method.as_ref(),
        }))
        .save()?;

    Ok(Json(payout))
}

pub async fn list_payouts(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(creator_id): Path<String>,
    Query(query): Query<PayoutListQuery>,
) -> Result<Json<Paginated<PayoutRequest>>> {
    principal.require_creator_or_admin(&creator_id)?;
    let conn = state.db.get()?;
    let (items, total) = payouts::list(
        &conn,
        Some(&creator_id),
        query.status,
        query.pagination.limit(),
        query.pagination.offset(),
    )?;
    Ok(Json(Paginated::from_query(items, total, &query.pagination)))
}

pub async fn get_payout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((creator_id, payout_id)): Path<(String, String)>,
) -> Result<Json<PayoutRequest>> {
    principal.require_creator_or_admin(&creator_id)?;
    let conn = state.db.get()?;
    Ok(Json(payouts::get(&conn, &creator_id, &payout_id)?))
}

/// `DELETE` withdraws a still-pending request; the record is kept as rejected.
pub async fn withdraw_payout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path((creator_id, payout_id)): Path<(String, String)>,
) -> Result<Json<PayoutRequest>> {
    principal.require_creator_or_admin(&creator_id)?;
    let mut conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    let payout = payouts::withdraw(&mut conn, &creator_id, &payout_id, queries::now())?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::WithdrawPayout)
        .resource("payout", &payout.id)
        .save()?;

    Ok(Json(payout))
}
