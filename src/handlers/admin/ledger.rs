use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::ledger;
use crate::middleware::Principal;
use crate::models::{
    AuditAction, ReconcileReport, ShareRatioOverride, ShareRatios, Transaction, UserRole,
};
use crate::pagination::{Paginated, PaginationQuery};
use crate::util::AuditLogBuilder;

#[derive(Debug, Deserialize)]
pub struct SetShareRatioBody {
    pub creator_share: f64,
}

#[derive(Debug, Deserialize)]
pub struct ReverseBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    #[serde(flatten)]
    pub pagination: PaginationQuery,
    pub creator_id: Option<String>,
}

// ============ Share ratios ============

pub async fn list_share_ratios(State(state): State<AppState>) -> Result<Json<Vec<ShareRatioOverride>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_share_ratio_overrides(&conn)?))
}

/// Applies to sales settled from now on; existing transactions keep the
/// ratios they were settled with.
pub async fn set_share_ratio(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(creator_id): Path<String>,
    Json(input): Json<SetShareRatioBody>,
) -> Result<Json<ShareRatioOverride>> {
    let ratios = ShareRatios::for_creator(input.creator_share);
    if !(0.0..=1.0).contains(&input.creator_share) || ratios.validate().is_err() {
        return Err(AppError::BadRequest("creator_share must be between 0 and 1".into()));
    }

    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;
    let creator = queries::get_user_by_id(&conn, &creator_id)?.or_not_found(msg::USER_NOT_FOUND)?;
    if creator.role != UserRole::Creator {
        return Err(AppError::BadRequest(format!("user {} is not a creator", creator_id)));
    }

    let previous = queries::get_share_ratio_override(&conn, &creator_id)?;
    let updated = queries::set_share_ratio_override(&conn, &creator_id, input.creator_share)?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::SetShareRatio)
        .resource("user", &creator_id)
        .details(&serde_json::json!({
            "creator_share": input.creator_share,
            "previous": previous.map(|p| p.creator_share),
        }))
        .save()?;

    Ok(Json(updated))
}

pub async fn clear_share_ratio(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(creator_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    if !queries::clear_share_ratio_override(&conn, &creator_id)? {
        return Err(AppError::NotFound("No share ratio override for this creator".into()));
    }

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::ClearShareRatio)
        .resource("user", &creator_id)
        .save()?;

    Ok(Json(serde_json::json!({ "success": true })))
}

// ============ Transactions ============

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Paginated<Transaction>>> {
    let conn = state.db.get()?;
    let (txns, total) = queries::list_transactions_paginated(
        &conn,
        query.creator_id.as_deref(),
        query.pagination.limit(),
        query.pagination.offset(),
    )?;
    Ok(Json(Paginated::from_query(txns, total, &query.pagination)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Transaction>> {
    let conn = state.db.get()?;
    let txn = queries::get_transaction(&conn, &transaction_id)?.or_not_found(msg::TRANSACTION_NOT_FOUND)?;
    Ok(Json(txn))
}

pub async fn reverse_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(transaction_id): Path<String>,
    Json(input): Json<ReverseBody>,
) -> Result<Json<Transaction>> {
    let reason = input.reason.trim();
    if reason.is_empty() {
        return Err(AppError::BadRequest("reason must not be empty".into()));
    }

    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;
    let reversal = ledger::reverse(&conn, &transaction_id, reason, queries::now())?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::ReverseTransaction)
        .resource("transaction", &transaction_id)
        .details(&serde_json::json!({
            "reversal_id": reversal.id,
            "reason": reason,
            "gross_amount": reversal.gross_amount,
            "currency": reversal.currency,
        }))
        .save()?;

    Ok(Json(reversal))
}

pub async fn run_reconciliation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
) -> Result<Json<ReconcileReport>> {
    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;
    let report = ledger::reconcile(&conn)?;

    if !report.is_clean() {
        tracing::warn!(
            "Reconciliation found {} drifting rows and {} unsettled payments",
            report.drift.len(),
            report.missing_settlements.len()
        );
    }

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::RunReconciliation)
        .resource("ledger", "transactions")
        .details(&serde_json::json!({
            "transactions_checked": report.transactions_checked,
            "drift": report.drift.len(),
            "missing_settlements": report.missing_settlements.len(),
        }))
        .save()?;

    Ok(Json(report))
}
