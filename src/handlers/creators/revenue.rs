use axum::extract::{Extension, State};
use serde::Deserialize;

use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::ledger;
use crate::middleware::Principal;
use crate::models::{PayoutBalance, RevenuePeriod, RevenueSummary};
use crate::payouts;
use crate::util::normalize_currency;

#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    /// Inclusive bounds, unix seconds.
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub currency: String,
}

fn currency_param(raw: &str) -> Result<String> {
    normalize_currency(raw).ok_or_else(|| AppError::BadRequest(msg::INVALID_CURRENCY.into()))
}

pub async fn get_revenue_summary(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(creator_id): Path<String>,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<RevenueSummary>> {
    principal.require_creator_or_admin(&creator_id)?;
    let currency = query.currency.as_deref().map(currency_param).transpose()?;
    let period = RevenuePeriod {
        start: query.start,
        end: query.end,
    };

    let conn = state.db.get()?;
    Ok(Json(ledger::revenue_summary(
        &conn,
        &creator_id,
        period,
        currency.as_deref(),
    )?))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(creator_id): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<PayoutBalance>> {
    principal.require_creator_or_admin(&creator_id)?;
    let currency = currency_param(&query.currency)?;
    let conn = state.db.get()?;
    Ok(Json(payouts::balance(&conn, &creator_id, &currency)?))
}
