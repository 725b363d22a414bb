//! Creator payout workflow.
//!
//! `pending -> processing -> paid`, with `pending | processing -> rejected`.
//! A request reserves its amount against accrued creator revenue in the same
//! currency until it is rejected. The balance check and the insert happen in
//! one IMMEDIATE transaction, so concurrent submissions for the same creator
//! cannot both spend the same balance.

use rusqlite::{Connection, TransactionBehavior};
use thiserror::Error;

use crate::db::queries;
use crate::error::{AppError, msg};
use crate::id::EntityType;
use crate::models::{
    CreatePayout, PayoutBalance, PayoutMethod, PayoutOutcome, PayoutRequest, PayoutStatus,
};
use crate::util::{money_le, normalize_currency};

/// Rejection reason recorded when a creator pulls back their own request.
pub const WITHDRAWN_BY_CREATOR: &str = "withdrawn_by_creator";

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: f64, requested: f64 },

    #[error("unsupported payout method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid payout request: {0}")]
    InvalidRequest(String),

    #[error("cannot move payout from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("payout request not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<rusqlite::Error> for PayoutError {
    fn from(e: rusqlite::Error) -> Self {
        PayoutError::Store(AppError::Database(e))
    }
}

impl From<PayoutError> for AppError {
    fn from(e: PayoutError) -> Self {
        match e {
            PayoutError::InsufficientBalance { .. } => AppError::Unprocessable(e.to_string()),
            PayoutError::UnsupportedMethod(_) | PayoutError::InvalidRequest(_) => {
                AppError::BadRequest(e.to_string())
            }
            PayoutError::InvalidTransition { .. } => AppError::Conflict(e.to_string()),
            PayoutError::NotFound => AppError::NotFound(msg::PAYOUT_NOT_FOUND.into()),
            PayoutError::Store(inner) => inner,
        }
    }
}

type Result<T> = std::result::Result<T, PayoutError>;

/// Accrued, reserved and available creator funds in one currency.
pub fn balance(conn: &Connection, creator_id: &str, currency: &str) -> Result<PayoutBalance> {
    let accrued = queries::accrued_creator_revenue(conn, creator_id, currency)?;
    let reserved = queries::reserved_payout_total(conn, creator_id, currency)?;
    Ok(PayoutBalance {
        creator_id: creator_id.to_string(),
        currency: currency.to_string(),
        accrued,
        reserved,
        available: accrued - reserved,
    })
}

/// Create a pending payout if the creator's available balance covers it.
pub fn submit(conn: &mut Connection, creator_id: &str, input: &CreatePayout, now: i64) -> Result<PayoutRequest> {
    if !input.amount.is_finite() || input.amount <= 0.0 {
        return Err(PayoutError::InvalidRequest(
            "amount must be a positive number".into(),
        ));
    }
    let currency = normalize_currency(&input.currency)
        .ok_or_else(|| PayoutError::InvalidRequest(msg::INVALID_CURRENCY.into()))?;
    if !input.payment_method.supports_currency(&currency) {
        return Err(PayoutError::UnsupportedMethod(format!(
            "{} does not pay out in {}",
            input.payment_method.as_ref(),
            currency
        )));
    }
    let destination = input.destination().ok_or_else(|| {
        PayoutError::InvalidRequest(match input.payment_method {
            PayoutMethod::PayPal => "paypal_email is required".into(),
            PayoutMethod::Portone => "portone_phone is required".into(),
        })
    })?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = balance(&tx, creator_id, &currency)?;
    if !money_le(input.amount, current.available) {
        tracing::info!(
            "Payout of {} {} for {} refused: {} available",
            input.amount,
            currency,
            creator_id,
            current.available
        );
        return Err(PayoutError::InsufficientBalance {
            available: current.available,
            requested: input.amount,
        });
    }

    let payout = PayoutRequest {
        id: EntityType::Payout.gen_id(),
        creator_id: creator_id.to_string(),
        payment_method: input.payment_method,
        amount: input.amount,
        currency,
        destination: destination.to_string(),
        status: PayoutStatus::Pending,
        rejection_reason: None,
        requested_at: now,
        resolved_at: None,
        updated_at: now,
    };
    queries::insert_payout(&tx, &payout)?;
    tx.commit()?;

    tracing::info!(
        "Payout {} requested: {} {} via {}",
        payout.id,
        payout.amount,
        payout.currency,
        payout.payment_method.as_ref()
    );
    Ok(payout)
}

/// Apply an operator decision.
pub fn resolve(conn: &mut Connection, id: &str, outcome: &PayoutOutcome, now: i64) -> Result<PayoutRequest> {
    let reason = match outcome {
        PayoutOutcome::Rejected { reason } => Some(reason.as_deref().unwrap_or("rejected_by_operator")),
        _ => None,
    };
    transition(conn, id, None, outcome.target_status(), reason, now)
}

/// Creator withdraws a request that has not started processing.
pub fn withdraw(conn: &mut Connection, creator_id: &str, id: &str, now: i64) -> Result<PayoutRequest> {
    transition(
        conn,
        id,
        Some(creator_id),
        PayoutStatus::Rejected,
        Some(WITHDRAWN_BY_CREATOR),
        now,
    )
    .inspect(|p| tracing::info!("Payout {} withdrawn by {}", p.id, creator_id))
}

fn transition(
    conn: &mut Connection,
    id: &str,
    owner: Option<&str>,
    to: PayoutStatus,
    reason: Option<&str>,
    now: i64,
) -> Result<PayoutRequest> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = queries::get_payout(&tx, id)?
        .filter(|p| owner.is_none_or(|o| p.creator_id == o))
        .ok_or(PayoutError::NotFound)?;

    // Creators may only withdraw before the operator picks the request up.
    let allowed = match owner {
        Some(_) => current.status == PayoutStatus::Pending,
        None => current.status.can_transition_to(to),
    };
    if !allowed {
        return Err(PayoutError::InvalidTransition {
            from: current.status.as_ref().to_string(),
            to: to.as_ref().to_string(),
        });
    }

    let updated = queries::transition_payout(&tx, id, current.status, to, reason, now)?.ok_or_else(|| {
        PayoutError::InvalidTransition {
            from: current.status.as_ref().to_string(),
            to: to.as_ref().to_string(),
        }
    })?;
    tx.commit()?;

    tracing::info!(
        "Payout {} moved {} -> {}",
        id,
        current.status.as_ref(),
        updated.status.as_ref()
    );
    Ok(updated)
}

pub fn get(conn: &Connection, creator_id: &str, id: &str) -> Result<PayoutRequest> {
    queries::get_payout(conn, id)?
        .filter(|p| p.creator_id == creator_id)
        .ok_or(PayoutError::NotFound)
}

pub fn list(
    conn: &Connection,
    creator_id: Option<&str>,
    status: Option<PayoutStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PayoutRequest>, i64)> {
    Ok(queries::list_payouts_paginated(conn, creator_id, status, limit, offset)?)
}
