//! Subscription and purchase state machine.
//!
//! ```text
//! inactive --succeeded--> active --failed renewal--> past_due
//!                           |  ^                        |
//!                           |  +-------succeeded--------+
//!                           +--cancellation/expiry--> canceled (terminal)
//!                           +--upgrade to yearly-----> upgraded (terminal)
//! ```
//!
//! A user cancellation normally only stamps `canceled_at` and leaves the row
//! `active` until the paid period runs out; expiry then cancels it. Refunds
//! revoke access right away.
//!
//! A succeeded payment after cancellation supersedes the canceled row and
//! starts a new lifecycle. Events older than the newest one already applied
//! never move the state backwards.
//!
//! Callers run these inside an IMMEDIATE transaction. Row writes are also
//! guarded by a version compare-and-swap.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::id::EntityType;
use crate::ledger;
use crate::models::{
    BillingInterval, CancellationEvent, CatalogItem, ChargeType, Entitlement, EntitlementDelta,
    EntitlementStatus, EntitlementView, ObservedStatus, PaymentEvent, PaymentKind, RefundEvent,
    UpgradeQuote,
};
use crate::payments::PaymentProvider;
use crate::util::floor_to_minor_unit;

const ONE_DAY: i64 = 86_400;
/// Monthly prices are prorated over a flat 30 days.
const PRORATION_DAYS: f64 = 30.0;

/// Apply a payment confirmation to the (user, subject) entitlement.
pub fn apply_payment(
    conn: &Connection,
    event: &PaymentEvent,
    item: &CatalogItem,
    now: i64,
) -> Result<EntitlementDelta> {
    let ts = event.provider_timestamp;
    let current = queries::get_current_entitlement(conn, &event.user_id, &event.plan_or_item_id)?;

    match event.observed_status {
        ObservedStatus::Failed => apply_failure(conn, event, current),
        ObservedStatus::Succeeded => {
            let Some(ent) = current else {
                let created = start_lifecycle(conn, event, item, None, now)?;
                return Ok(delta(EntitlementStatus::Inactive, created, true));
            };

            match ent.status {
                EntitlementStatus::Canceled | EntitlementStatus::Inactive | EntitlementStatus::Upgraded => {
                    let canceled_at = ent.canceled_at.unwrap_or(ent.last_event_at);
                    if ts <= canceled_at {
                        // Paid before it was canceled: revenue is real, access stays revoked.
                        tracing::info!(
                            "Payment {} predates cancellation of {}; settling without reactivation",
                            event.provider_transaction_id,
                            ent.id
                        );
                        return Ok(EntitlementDelta::unchanged(Some(ent), true));
                    }
                    let previous = ent.status;
                    let created = start_lifecycle(conn, event, item, Some(&ent), now)?;
                    Ok(delta(previous, created, true))
                }
                EntitlementStatus::Active | EntitlementStatus::PastDue => {
                    if ts < ent.last_event_at {
                        tracing::debug!(
                            "Out-of-order payment {} for {} (event {} < last {})",
                            event.provider_transaction_id,
                            ent.id,
                            ts,
                            ent.last_event_at
                        );
                        return Ok(EntitlementDelta::unchanged(Some(ent), true));
                    }
                    let previous = ent.status;
                    let mut next = ent.clone();
                    next.status = EntitlementStatus::Active;
                    next.expires_at = match event.kind {
                        PaymentKind::Subscription => {
                            let base = ent.expires_at.map_or(ts, |exp| exp.max(ts));
                            Some(interval_for(item).advance(base))
                        }
                        PaymentKind::OneTimePurchase => None,
                    };
                    next.last_event_at = ts;
                    if ent.canceled_at.is_some_and(|at| ts > at) {
                        tracing::info!("Payment {} resumes {}", event.provider_transaction_id, ent.id);
                        next.canceled_at = None;
                    }
                    let updated = write(conn, next, ent.version)?;
                    Ok(delta(previous, updated, true))
                }
            }
        }
    }
}

fn apply_failure(
    conn: &Connection,
    event: &PaymentEvent,
    current: Option<Entitlement>,
) -> Result<EntitlementDelta> {
    let Some(ent) = current else {
        return Ok(EntitlementDelta::unchanged(None, false));
    };

    let renewal_failure = event.kind == PaymentKind::Subscription
        && event.charge == ChargeType::Renewal
        && ent.status == EntitlementStatus::Active
        && event.provider_timestamp >= ent.last_event_at;

    if !renewal_failure {
        return Ok(EntitlementDelta::unchanged(Some(ent), false));
    }

    let mut next = ent.clone();
    next.status = EntitlementStatus::PastDue;
    next.last_event_at = event.provider_timestamp;
    let updated = write(conn, next, ent.version)?;
    tracing::info!("Entitlement {} is past due after failed renewal", updated.id);
    Ok(delta(EntitlementStatus::Active, updated, false))
}

/// Provider-signalled end of a subscription.
pub fn apply_cancellation(conn: &Connection, event: &CancellationEvent) -> Result<EntitlementDelta> {
    let current = queries::get_current_entitlement(conn, &event.user_id, &event.plan_or_item_id)?;
    let Some(ent) = current else {
        return Ok(EntitlementDelta::unchanged(None, false));
    };

    let cancellable = matches!(ent.status, EntitlementStatus::Active | EntitlementStatus::PastDue);
    if !cancellable || event.provider_timestamp < ent.last_event_at {
        return Ok(EntitlementDelta::unchanged(Some(ent), false));
    }

    let previous = ent.status;
    let updated = cancel_row(conn, ent, event.provider_timestamp)?;
    Ok(delta(previous, updated, false))
}

/// Revoke access bought by a refunded charge.
pub fn apply_refund(conn: &Connection, event: &RefundEvent) -> Result<EntitlementDelta> {
    let current = queries::get_current_entitlement(conn, &event.user_id, &event.plan_or_item_id)?;
    let Some(ent) = current else {
        return Ok(EntitlementDelta::unchanged(None, false));
    };
    if !matches!(ent.status, EntitlementStatus::Active | EntitlementStatus::PastDue) {
        return Ok(EntitlementDelta::unchanged(Some(ent), false));
    }

    let previous = ent.status;
    let at = event.provider_timestamp.max(ent.last_event_at);
    let updated = cancel_row(conn, ent, at)?;
    tracing::info!("Entitlement {} revoked by refund {}", updated.id, event.provider_event_id);
    Ok(delta(previous, updated, false))
}

/// User-initiated cancellation. Returns `None` when there is nothing to cancel.
///
/// With `at_period_end`, a subscription with paid time left keeps access and
/// is canceled by [`expire_due`] once `expires_at` passes. Everything else
/// (past due, one-time purchases, immediate requests) is canceled now.
pub fn cancel(
    conn: &Connection,
    user_id: &str,
    subject_id: &str,
    at_period_end: bool,
    now: i64,
) -> Result<Option<Entitlement>> {
    let Some(ent) = queries::get_current_entitlement(conn, user_id, subject_id)? else {
        return Ok(None);
    };
    match ent.status {
        EntitlementStatus::Active if at_period_end && ent.expires_at.is_some_and(|exp| exp > now) => {
            if ent.canceled_at.is_some() {
                return Ok(Some(ent));
            }
            let version = ent.version;
            let mut next = ent;
            next.canceled_at = Some(now);
            next.last_event_at = next.last_event_at.max(now);
            let updated = write(conn, next, version)?;
            tracing::info!(
                "Entitlement {} will end at {:?}",
                updated.id,
                updated.expires_at
            );
            Ok(Some(updated))
        }
        EntitlementStatus::Active | EntitlementStatus::PastDue => Ok(Some(cancel_row(conn, ent, now)?)),
        _ => Ok(Some(ent)),
    }
}

/// Trade the user's active monthly `from_plan_id` in for yearly `to_plan_id`.
///
/// The unused days of the monthly period (rounded up) are credited at
/// `price / 30` per day, rounded down to the currency's minor unit. The
/// monthly entitlement ends as `upgraded`; the yearly one starts when the
/// checkout for `final_amount` is confirmed.
pub fn upgrade(
    conn: &mut Connection,
    user_id: &str,
    from_plan_id: &str,
    to_plan_id: &str,
    now: i64,
) -> Result<UpgradeQuote> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let user = queries::get_user_by_id(&tx, user_id)?.or_not_found(msg::USER_NOT_FOUND)?;
    let from_plan = queries::get_catalog_item(&tx, from_plan_id)?.or_not_found(msg::ITEM_NOT_FOUND)?;
    let to_plan = queries::get_catalog_item(&tx, to_plan_id)?.or_not_found(msg::ITEM_NOT_FOUND)?;

    if !from_plan.kind.is_plan() || from_plan.billing_interval != Some(BillingInterval::Month) {
        return Err(AppError::BadRequest("Only monthly plans can be upgraded".into()));
    }
    if !to_plan.kind.is_plan() || to_plan.billing_interval != Some(BillingInterval::Year) {
        return Err(AppError::BadRequest("Upgrades must target a yearly plan".into()));
    }
    let (Some(monthly_price), Some(yearly_price)) = (from_plan.price, to_plan.price) else {
        return Err(AppError::BadRequest("Both plans need a price".into()));
    };
    let currency = match (from_plan.currency.as_deref(), to_plan.currency.as_deref()) {
        (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => a.to_ascii_uppercase(),
        _ => return Err(AppError::BadRequest("Both plans must be priced in the same currency".into())),
    };

    let ent = queries::get_current_entitlement(&tx, user_id, from_plan_id)?.or_not_found(msg::NOT_FOUND)?;
    if ent.status != EntitlementStatus::Active {
        return Err(AppError::BadRequest("Only active subscriptions can be upgraded".into()));
    }
    let expires_at = ent
        .expires_at
        .ok_or_else(|| AppError::BadRequest("Only subscriptions can be upgraded".into()))?;
    let remaining_days = (expires_at - now + ONE_DAY - 1).div_euclid(ONE_DAY);
    if remaining_days < 1 {
        return Err(AppError::BadRequest(
            "Not enough days remaining for upgrade (minimum 1 day)".into(),
        ));
    }

    let daily_rate = monthly_price / PRORATION_DAYS;
    let credit_amount = floor_to_minor_unit(daily_rate * remaining_days as f64, &currency).min(yearly_price);
    let final_amount = yearly_price - credit_amount;

    let version = ent.version;
    let mut next = ent;
    next.status = EntitlementStatus::Upgraded;
    next.canceled_at = Some(now);
    next.last_event_at = next.last_event_at.max(now);
    let upgraded = write(&tx, next, version)?;

    let provider = PaymentProvider::for_country(&user.country);
    let credits = ledger::post_upgrade_credit(
        &tx,
        user_id,
        provider,
        &from_plan,
        &to_plan,
        credit_amount,
        &currency,
        now,
    )?;
    tx.commit()?;

    tracing::info!(
        "Upgraded {} for {}: {} days left, credit {} {}, yearly due {}",
        upgraded.id,
        user_id,
        remaining_days,
        credit_amount,
        currency,
        final_amount
    );
    Ok(UpgradeQuote {
        upgraded,
        target_plan_id: to_plan.id,
        currency,
        remaining_days,
        daily_rate,
        credit_amount,
        yearly_price,
        final_amount,
        credit_transaction_ids: credits.into_iter().map(|t| t.id).collect(),
    })
}

/// Cancel subscriptions whose paid period ended before `now - grace_secs`.
/// Subscriptions the user already canceled end at `expires_at`, with no grace.
pub fn expire_due(conn: &Connection, grace_secs: i64, now: i64, limit: i64) -> Result<usize> {
    let due = queries::list_entitlements_due_for_expiry(conn, now - grace_secs, now, limit)?;
    let mut expired = 0;
    for ent in due {
        let id = ent.id.clone();
        match cancel_row(conn, ent, now) {
            Ok(_) => expired += 1,
            // Touched by a payment since we listed it. Next pass will re-check.
            Err(AppError::Conflict(_)) => tracing::debug!("Skipping expiry of {}: changed", id),
            Err(e) => return Err(e),
        }
    }
    Ok(expired)
}

/// Current view of a (user, subject) pair. Missing rows read as inactive.
pub fn view(conn: &Connection, user_id: &str, subject_id: &str) -> Result<EntitlementView> {
    Ok(queries::get_current_entitlement(conn, user_id, subject_id)?
        .map(|e| EntitlementView::from(&e))
        .unwrap_or_else(|| EntitlementView::inactive(subject_id)))
}

fn cancel_row(conn: &Connection, ent: Entitlement, at: i64) -> Result<Entitlement> {
    let version = ent.version;
    let mut next = ent;
    next.status = EntitlementStatus::Canceled;
    next.canceled_at = Some(next.canceled_at.map_or(at, |requested| requested.min(at)));
    next.last_event_at = next.last_event_at.max(at);
    write(conn, next, version)
}

fn start_lifecycle(
    conn: &Connection,
    event: &PaymentEvent,
    item: &CatalogItem,
    previous: Option<&Entitlement>,
    now: i64,
) -> Result<Entitlement> {
    if let Some(prev) = previous {
        if !queries::supersede_entitlement(conn, &prev.id, prev.version, now)? {
            return Err(conflict(&prev.id));
        }
    }

    let ts = event.provider_timestamp;
    let ent = Entitlement {
        id: EntityType::Entitlement.gen_id(),
        user_id: event.user_id.clone(),
        subject_id: event.plan_or_item_id.clone(),
        status: EntitlementStatus::Active,
        activated_at: ts,
        expires_at: match event.kind {
            PaymentKind::Subscription => Some(interval_for(item).advance(ts)),
            PaymentKind::OneTimePurchase => None,
        },
        canceled_at: None,
        last_event_at: ts,
        version: 1,
        superseded_at: None,
        created_at: now,
        updated_at: now,
    };
    queries::insert_entitlement(conn, &ent)?;
    tracing::info!(
        "Activated entitlement {} for user {} on {}",
        ent.id,
        ent.user_id,
        ent.subject_id
    );
    Ok(ent)
}

fn write(conn: &Connection, mut next: Entitlement, expected_version: i64) -> Result<Entitlement> {
    if !queries::update_entitlement_cas(conn, &next, expected_version)? {
        return Err(conflict(&next.id));
    }
    next.version = expected_version + 1;
    Ok(next)
}

fn interval_for(item: &CatalogItem) -> BillingInterval {
    item.billing_interval.unwrap_or(BillingInterval::Month)
}

fn delta(previous: EntitlementStatus, ent: Entitlement, settle: bool) -> EntitlementDelta {
    EntitlementDelta {
        previous,
        current: ent.status,
        entitlement: Some(ent),
        settle,
    }
}

fn conflict(id: &str) -> AppError {
    AppError::Conflict(format!("entitlement {} was modified concurrently", id))
}
