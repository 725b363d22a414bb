//! Append-only revenue ledger.
//!
//! Each succeeded payment becomes exactly one immutable `Transaction` with
//! its creator/platform split frozen at settlement time. Rows are never
//! updated (a trigger enforces it); corrections are posted as reversing
//! entries that negate the original amounts.

use rusqlite::{Connection, ErrorCode};
use thiserror::Error;

use crate::config::LedgerSettings;
use crate::db::queries;
use crate::error::{AppError, Result, msg};
use crate::id::EntityType;
use crate::models::{
    CatalogItem, LedgerDrift, ObservedStatus, PaymentEvent, ReconcileReport, RefundEvent,
    RevenuePeriod, RevenueSummary, ShareRatios, Transaction,
};
use crate::payments::PaymentProvider;
use crate::util::{MONEY_EPSILON, money_eq};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("payment event {0} is already settled")]
    DuplicateSettlement(String),

    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Store(AppError::Database(e))
    }
}

impl LedgerError {
    /// Errors that halt the event instead of being retried.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LedgerError::Store(_))
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Store(inner) => inner,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl ShareRatios {
    /// Split with `creator` going to the creator and the rest to the platform.
    pub fn for_creator(creator: f64) -> Self {
        Self {
            creator,
            platform: 1.0 - creator,
        }
    }

    pub fn platform_only() -> Self {
        Self {
            creator: 0.0,
            platform: 1.0,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), LedgerError> {
        let in_range = |r: f64| r.is_finite() && (-MONEY_EPSILON..=1.0 + MONEY_EPSILON).contains(&r);
        if !in_range(self.creator) || !in_range(self.platform) {
            return Err(LedgerError::InvariantViolation(format!(
                "share ratios out of range: creator={} platform={}",
                self.creator, self.platform
            )));
        }
        if !money_eq(self.creator + self.platform, 1.0) {
            return Err(LedgerError::InvariantViolation(format!(
                "share ratios sum to {} instead of 1",
                self.creator + self.platform
            )));
        }
        Ok(())
    }
}

/// `(creator_revenue, platform_revenue)` for `gross` under `ratios`.
pub fn compute_split(gross: f64, ratios: &ShareRatios) -> (f64, f64) {
    (gross * ratios.creator, gross * ratios.platform)
}

/// Override for the creator if any, else the platform default. Sales with no
/// creator are platform-only.
pub fn resolve_ratios(
    conn: &Connection,
    creator_id: Option<&str>,
    settings: &LedgerSettings,
) -> Result<ShareRatios> {
    let Some(creator_id) = creator_id else {
        return Ok(ShareRatios::platform_only());
    };
    let creator_share = queries::get_share_ratio_override(conn, creator_id)?
        .map(|o| o.creator_share)
        .unwrap_or(settings.default_creator_share);
    Ok(ShareRatios::for_creator(creator_share))
}

/// Post a succeeded payment admitted as `payment_event_ref` to the ledger.
pub fn settle(
    conn: &Connection,
    payment_event_ref: &str,
    event: &PaymentEvent,
    item: &CatalogItem,
    settings: &LedgerSettings,
    now: i64,
) -> std::result::Result<Transaction, LedgerError> {
    if event.observed_status != ObservedStatus::Succeeded {
        return Err(LedgerError::InvariantViolation(format!(
            "refusing to settle failed payment {}",
            event.provider_transaction_id
        )));
    }
    if !event.amount.is_finite() || event.amount < 0.0 {
        return Err(LedgerError::InvariantViolation(format!(
            "gross amount {} is not a valid charge",
            event.amount
        )));
    }
    if queries::get_transaction_by_event_ref(conn, payment_event_ref)?.is_some() {
        return Err(LedgerError::DuplicateSettlement(payment_event_ref.to_string()));
    }

    let ratios = resolve_ratios(conn, item.creator_id.as_deref(), settings)?;
    ratios.validate()?;
    let (creator_revenue, platform_revenue) = compute_split(event.amount, &ratios);
    if !money_eq(creator_revenue + platform_revenue, event.amount) {
        return Err(LedgerError::InvariantViolation(format!(
            "split {} + {} does not add up to gross {}",
            creator_revenue, platform_revenue, event.amount
        )));
    }

    let txn = Transaction {
        id: EntityType::Transaction.gen_id(),
        payment_event_ref: Some(payment_event_ref.to_string()),
        provider: event.provider,
        user_id: event.user_id.clone(),
        subject_id: event.plan_or_item_id.clone(),
        creator_id: item.creator_id.clone(),
        gross_amount: event.amount,
        currency: event.currency.clone(),
        creator_share_ratio: ratios.creator,
        platform_share_ratio: ratios.platform,
        creator_revenue,
        platform_revenue,
        reverses_transaction_id: None,
        reason: None,
        settled_at: now,
    };

    match queries::insert_transaction(conn, &txn) {
        Ok(()) => {}
        Err(AppError::Database(e)) if is_unique_violation(&e) => {
            return Err(LedgerError::DuplicateSettlement(payment_event_ref.to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        "Settled {} {} {} for creator {:?} (creator {:.2}, platform {:.2})",
        txn.id,
        txn.gross_amount,
        txn.currency,
        txn.creator_id,
        txn.creator_revenue,
        txn.platform_revenue
    );
    Ok(txn)
}

/// Post a reversing entry for `transaction_id`. At most one per transaction.
pub fn reverse(conn: &Connection, transaction_id: &str, reason: &str, now: i64) -> Result<Transaction> {
    let original = queries::get_transaction(conn, transaction_id)?
        .ok_or_else(|| AppError::NotFound(msg::TRANSACTION_NOT_FOUND.into()))?;
    if original.reverses_transaction_id.is_some() {
        return Err(AppError::BadRequest(
            "A reversing entry cannot itself be reversed".into(),
        ));
    }
    if let Some(existing) = queries::get_reversal_of(conn, transaction_id)? {
        return Err(AppError::Conflict(format!(
            "Transaction already reversed by {}",
            existing.id
        )));
    }

    let reversal = Transaction {
        id: EntityType::Transaction.gen_id(),
        payment_event_ref: None,
        gross_amount: -original.gross_amount,
        creator_revenue: -original.creator_revenue,
        platform_revenue: -original.platform_revenue,
        reverses_transaction_id: Some(original.id.clone()),
        reason: Some(reason.to_string()),
        settled_at: now,
        ..original
    };

    match queries::insert_transaction(conn, &reversal) {
        Ok(()) => {}
        Err(AppError::Database(e)) if is_unique_violation(&e) => {
            return Err(AppError::Conflict("Transaction already reversed".into()));
        }
        Err(e) => return Err(e),
    }
    tracing::info!("Reversed {} with {} ({})", transaction_id, reversal.id, reason);
    Ok(reversal)
}

/// Reverse the settlement of the charge `refund` points at.
///
/// Only full refunds of a settled charge are posted automatically. Anything
/// else (unknown charge, other payer, partial amount) halts for an operator.
pub fn refund(conn: &Connection, refund: &RefundEvent, now: i64) -> std::result::Result<Transaction, LedgerError> {
    let charge = queries::get_payment_event_by_key(conn, refund.provider, &refund.original_transaction_id)?
        .ok_or_else(|| {
            LedgerError::InvariantViolation(format!(
                "refund {} references unknown charge {}",
                refund.provider_event_id, refund.original_transaction_id
            ))
        })?;
    let original = queries::get_transaction_by_event_ref(conn, &charge.id)?.ok_or_else(|| {
        LedgerError::InvariantViolation(format!(
            "refund {} references charge {} which was never settled",
            refund.provider_event_id, refund.original_transaction_id
        ))
    })?;

    if original.user_id != refund.user_id || original.subject_id != refund.plan_or_item_id {
        return Err(LedgerError::InvariantViolation(format!(
            "refund {} does not match the payer or item of {}",
            refund.provider_event_id, original.id
        )));
    }
    if !original.currency.eq_ignore_ascii_case(&refund.currency) {
        return Err(LedgerError::InvariantViolation(format!(
            "refund {} is in {} but {} settled in {}",
            refund.provider_event_id, refund.currency, original.id, original.currency
        )));
    }
    if !money_eq(refund.amount, original.gross_amount) {
        return Err(LedgerError::InvariantViolation(format!(
            "partial refund of {} against {} {} needs a manual adjustment",
            refund.amount, original.gross_amount, original.currency
        )));
    }

    if let Some(existing) = queries::get_reversal_of(conn, &original.id)? {
        tracing::info!(
            "Refund {} finds {} already reversed by {}",
            refund.provider_event_id,
            original.id,
            existing.id
        );
        return Ok(existing);
    }
    let reason = format!("refund {}", refund.provider_event_id);
    Ok(reverse(conn, &original.id, &reason, now)?)
}

/// Move `credit` of prepaid revenue from `from_plan` to `to_plan`.
///
/// Posts a negative entry against the monthly plan and a matching positive
/// one against the yearly plan, so cash totals are unchanged and each plan
/// carries the revenue it actually earned.
#[allow(clippy::too_many_arguments)]
pub fn post_upgrade_credit(
    conn: &Connection,
    user_id: &str,
    provider: PaymentProvider,
    from_plan: &CatalogItem,
    to_plan: &CatalogItem,
    credit: f64,
    currency: &str,
    now: i64,
) -> Result<Vec<Transaction>> {
    if !credit.is_finite() || credit < 0.0 {
        return Err(AppError::BadRequest(format!("invalid upgrade credit {}", credit)));
    }
    if money_eq(credit, 0.0) {
        return Ok(Vec::new());
    }

    let entry = |item: &CatalogItem, amount: f64, reason: String| -> Result<Transaction> {
        let ratios = ShareRatios::platform_only();
        let (creator_revenue, platform_revenue) = compute_split(amount, &ratios);
        let txn = Transaction {
            id: EntityType::Transaction.gen_id(),
            payment_event_ref: None,
            provider,
            user_id: user_id.to_string(),
            subject_id: item.id.clone(),
            creator_id: item.creator_id.clone(),
            gross_amount: amount,
            currency: currency.to_string(),
            creator_share_ratio: ratios.creator,
            platform_share_ratio: ratios.platform,
            creator_revenue,
            platform_revenue,
            reverses_transaction_id: None,
            reason: Some(reason),
            settled_at: now,
        };
        queries::insert_transaction(conn, &txn)?;
        Ok(txn)
    };

    let debit = entry(from_plan, -credit, format!("upgrade credit to {}", to_plan.id))?;
    let applied = entry(to_plan, credit, format!("upgrade credit from {}", from_plan.id))?;
    tracing::info!(
        "Moved upgrade credit {} {} for {} from {} to {}",
        credit,
        currency,
        user_id,
        from_plan.id,
        to_plan.id
    );
    Ok(vec![debit, applied])
}

/// Creator and platform revenue for `creator_id` over `period`, summed per currency.
///
/// Top-level totals are only filled in when the result covers a single
/// currency. Amounts in different currencies are never added together.
pub fn revenue_summary(
    conn: &Connection,
    creator_id: &str,
    period: RevenuePeriod,
    currency: Option<&str>,
) -> Result<RevenueSummary> {
    if let (Some(start), Some(end)) = (period.start, period.end) {
        if start > end {
            return Err(AppError::BadRequest(msg::INVALID_PERIOD.into()));
        }
    }

    let by_currency: Vec<_> = queries::revenue_by_currency(conn, creator_id, &period)?
        .into_iter()
        .filter(|row| currency.is_none_or(|c| row.currency.eq_ignore_ascii_case(c)))
        .collect();

    let single = match by_currency.as_slice() {
        [] => Some(currency.map(str::to_ascii_uppercase)),
        [only] => Some(Some(only.currency.clone())),
        _ => None,
    };
    let (summary_currency, creator_revenue, platform_revenue) = match single {
        Some(code) => (
            code,
            Some(by_currency.iter().map(|r| r.creator_revenue).sum()),
            Some(by_currency.iter().map(|r| r.platform_revenue).sum()),
        ),
        None => (None, None, None),
    };

    Ok(RevenueSummary {
        creator_id: creator_id.to_string(),
        period,
        currency: summary_currency,
        creator_revenue,
        platform_revenue,
        by_currency,
    })
}

/// Recompute every row's split from its stored ratios and list what disagrees.
pub fn reconcile(conn: &Connection) -> Result<ReconcileReport> {
    let txns = queries::list_all_transactions(conn)?;
    let mut drift = Vec::new();

    for txn in &txns {
        let ratios = ShareRatios {
            creator: txn.creator_share_ratio,
            platform: txn.platform_share_ratio,
        };
        let (expected_creator, expected_platform) = compute_split(txn.gross_amount, &ratios);

        let problem = if let Err(e) = ratios.validate() {
            Some(e.to_string())
        } else if !money_eq(txn.creator_revenue, expected_creator)
            || !money_eq(txn.platform_revenue, expected_platform)
        {
            Some("stored split does not match ratios".to_string())
        } else {
            None
        };

        if let Some(problem) = problem {
            tracing::warn!("Ledger drift on {}: {}", txn.id, problem);
            drift.push(LedgerDrift {
                transaction_id: txn.id.clone(),
                stored_creator_revenue: txn.creator_revenue,
                expected_creator_revenue: expected_creator,
                stored_platform_revenue: txn.platform_revenue,
                expected_platform_revenue: expected_platform,
                problem,
            });
        }
    }

    let missing_settlements = queries::list_unsettled_applied_payments(conn)?;
    for id in &missing_settlements {
        tracing::warn!("Applied payment {} has no ledger entry", id);
    }

    Ok(ReconcileReport {
        transactions_checked: txns.len() as i64,
        drift,
        missing_settlements,
    })
}

/// Creator revenue accrued in `currency`, net of reversals.
pub fn accrued_creator_revenue(conn: &Connection, creator_id: &str, currency: &str) -> Result<f64> {
    queries::accrued_creator_revenue(conn, creator_id, currency)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}
