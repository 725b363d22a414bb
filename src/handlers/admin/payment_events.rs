use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::Principal;
use crate::models::{AdmissionStatus, AuditAction, PaymentEventRecord, ProviderEvent};
use crate::pagination::{Paginated, PaginationQuery};
use crate::pipeline::{self, ProcessOutcome};
use crate::util::AuditLogBuilder;

#[derive(Debug, Deserialize)]
pub struct PaymentEventQuery {
    #[serde(flatten)]
    pub pagination: PaginationQuery,
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Serialize)]
pub struct PaymentEventDetail {
    #[serde(flatten)]
    pub record: PaymentEventRecord,
    /// The canonical event as admitted. `None` if the stored copy no longer parses.
    pub event: Option<ProviderEvent>,
}

/// Lists admissions, newest first. `?status=pending` shows in-flight and
/// stalled reservations, `?status=failed` the ones waiting for an operator.
pub async fn list_payment_events(
    State(state): State<AppState>,
    Query(query): Query<PaymentEventQuery>,
) -> Result<Json<Paginated<PaymentEventRecord>>> {
    let conn = state.db.get()?;
    let (events, total) = queries::list_payment_events_paginated(
        &conn,
        query.status,
        query.pagination.limit(),
        query.pagination.offset(),
    )?;
    Ok(Json(Paginated::from_query(events, total, &query.pagination)))
}

pub async fn get_payment_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<PaymentEventDetail>> {
    let conn = state.db.get()?;
    let record = queries::get_payment_event(&conn, &event_id)?.or_not_found(msg::NOT_FOUND)?;
    let event = record
        .event()
        .inspect_err(|e| tracing::warn!("Stored payload of {} does not parse: {}", event_id, e))
        .ok();
    Ok(Json(PaymentEventDetail { record, event }))
}

pub async fn redrive_payment_event(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
) -> Result<Json<ProcessOutcome>> {
    let mut conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    let outcome = pipeline::redrive_failed(&mut conn, &event_id, &state.ledger, queries::now())?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::RedriveEvent)
        .resource("payment_event", &event_id)
        .details(&serde_json::json!({
            "transaction_id": outcome.transaction_id(),
            "entitlement_status": outcome.entitlement_status().map(|s| s.as_ref().to_string()),
        }))
        .save()?;

    Ok(Json(outcome))
}
