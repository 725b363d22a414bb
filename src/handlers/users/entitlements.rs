use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::entitlements;
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::Principal;
use crate::models::{
    AuditAction, CancelEntitlement, Entitlement, EntitlementStatus, EntitlementView, UpgradePlan,
    UpgradeQuote,
};
use crate::util::AuditLogBuilder;

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub user_id: String,
    /// `None` when the user never subscribed to a plan.
    pub plan_id: Option<String>,
    pub status: EntitlementStatus,
    pub activated_at: Option<i64>,
    pub expires_at: Option<i64>,
}

/// Callers may only look at their own entitlements; anyone else (and unknown
/// users) gets the same 404.
fn require_visible_user(state: &AppState, principal: &Principal, user_id: &str) -> Result<()> {
    principal.require_self_or_admin(user_id, msg::USER_NOT_FOUND)?;
    let conn = state.db.get()?;
    queries::get_user_by_id(&conn, user_id)?.or_not_found(msg::USER_NOT_FOUND)?;
    Ok(())
}

pub async fn get_entitlement(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((user_id, subject_id)): Path<(String, String)>,
) -> Result<Json<EntitlementView>> {
    require_visible_user(&state, &principal, &user_id)?;
    let conn = state.db.get()?;
    Ok(Json(entitlements::view(&conn, &user_id, &subject_id)?))
}

pub async fn list_entitlements(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Entitlement>>> {
    require_visible_user(&state, &principal, &user_id)?;
    let conn = state.db.get()?;
    Ok(Json(queries::list_current_entitlements_for_user(&conn, &user_id)?))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
) -> Result<Json<SubscriptionView>> {
    require_visible_user(&state, &principal, &user_id)?;
    let conn = state.db.get()?;
    let view = match queries::get_current_plan_entitlement(&conn, &user_id)? {
        Some(e) => SubscriptionView {
            user_id,
            plan_id: Some(e.subject_id),
            status: e.status,
            activated_at: Some(e.activated_at),
            expires_at: e.expires_at,
        },
        None => SubscriptionView {
            user_id,
            plan_id: None,
            status: EntitlementStatus::Inactive,
            activated_at: None,
            expires_at: None,
        },
    };
    Ok(Json(view))
}

pub async fn cancel_entitlement(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path((user_id, subject_id)): Path<(String, String)>,
    Query(options): Query<CancelEntitlement>,
) -> Result<Json<EntitlementView>> {
    require_visible_user(&state, &principal, &user_id)?;
    let conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    let canceled = entitlements::cancel(
        &conn,
        &user_id,
        &subject_id,
        options.at_period_end,
        queries::now(),
    )?
    .or_not_found(msg::NOT_FOUND)?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::CancelEntitlement)
        .resource("entitlement", &canceled.id)
        .details(&serde_json::json!({
            "user_id": user_id,
            "subject_id": subject_id,
            "at_period_end": options.at_period_end,
        }))
        .save()?;

    Ok(Json(EntitlementView::from(&canceled)))
}

pub async fn upgrade_entitlement(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path((user_id, subject_id)): Path<(String, String)>,
    Json(input): Json<UpgradePlan>,
) -> Result<Json<UpgradeQuote>> {
    require_visible_user(&state, &principal, &user_id)?;
    let mut conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    let quote = entitlements::upgrade(
        &mut conn,
        &user_id,
        &subject_id,
        input.target_plan_id.trim(),
        queries::now(),
    )?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::UpgradeEntitlement)
        .resource("entitlement", &quote.upgraded.id)
        .details(&serde_json::json!({
            "target_plan_id": quote.target_plan_id,
            "credit_amount": quote.credit_amount,
            "final_amount": quote.final_amount,
            "currency": quote.currency,
        }))
        .save()?;

    Ok(Json(quote))
}
