//! Admit-and-apply: the path every normalized provider event takes.
//!
//! 1. Validate the event against users and the catalog (no reservation on failure).
//! 2. Reserve it in the idempotency store.
//! 3. In one IMMEDIATE transaction: run the state machine, settle or reverse
//!    if asked, mark the reservation applied. Either all of it commits or none
//!    of it does.
//!
//! Ledger invariant failures halt the event (`failed`) for an operator.
//! Anything else releases the lease so a provider retry or the repair job
//! can pick it up again.

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use crate::config::LedgerSettings;
use crate::db::queries;
use crate::entitlements;
use crate::error::{AppError, Result, msg};
use crate::id::is_valid_prefixed_id;
use crate::idempotency::{self, Admission};
use crate::ledger::{self, LedgerError};
use crate::models::{
    AdmissionStatus, CatalogItem, EntitlementStatus, EventOutcome, NormalizedEvent,
    PaymentEventRecord, PaymentKind, ProviderEvent,
};
use crate::payments::PaymentProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessResult {
    Applied,
    AlreadyProcessed,
    InFlight,
    Ignored,
}

/// What the webhook acknowledges back to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub result: ProcessResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_status: Option<AdmissionStatus>,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

impl ProcessOutcome {
    fn from_record(result: ProcessResult, record: &PaymentEventRecord) -> Self {
        Self {
            result,
            event_id: Some(record.id.clone()),
            event_status: Some(record.status),
            outcome: record.outcome.clone(),
        }
    }

    pub fn ignored() -> Self {
        Self {
            result: ProcessResult::Ignored,
            event_id: None,
            event_status: None,
            outcome: EventOutcome::default(),
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.outcome.transaction_id.as_deref()
    }

    pub fn entitlement_status(&self) -> Option<EntitlementStatus> {
        self.outcome.entitlement_status
    }
}

/// Entry point for adapter output.
pub fn process_normalized(
    conn: &mut Connection,
    normalized: NormalizedEvent,
    settings: &LedgerSettings,
    now: i64,
) -> Result<ProcessOutcome> {
    match normalized {
        NormalizedEvent::Ignored { event_type } => {
            tracing::debug!("Ignoring provider event type {}", event_type);
            Ok(ProcessOutcome::ignored())
        }
        NormalizedEvent::Event(event) => process(conn, &event, settings, now),
    }
}

pub fn process(
    conn: &mut Connection,
    event: &ProviderEvent,
    settings: &LedgerSettings,
    now: i64,
) -> Result<ProcessOutcome> {
    validate(conn, event)?;

    match idempotency::admit(conn, event, settings.admission_lease_secs, now)? {
        Admission::Admitted(record) => apply_admitted(conn, &record, settings, now),
        Admission::AlreadyProcessed(record) => {
            Ok(ProcessOutcome::from_record(ProcessResult::AlreadyProcessed, &record))
        }
        Admission::InFlight(record) => {
            tracing::info!("Event {} is in flight elsewhere", record.id);
            Ok(ProcessOutcome::from_record(ProcessResult::InFlight, &record))
        }
    }
}

/// Checks that need the database but must not leave a reservation behind.
fn validate(conn: &Connection, event: &ProviderEvent) -> Result<CatalogItem> {
    let unknown_user = || AppError::BadRequest(format!("{}: {}", msg::UNKNOWN_USER, event.user_id()));
    let unknown_subject = || AppError::BadRequest(format!("{}: {}", msg::UNKNOWN_SUBJECT, event.subject_id()));

    // Provider metadata is free text; skip the lookup for anything that is not one of our ids
    if !is_valid_prefixed_id(event.user_id()) {
        return Err(unknown_user());
    }
    if !is_valid_prefixed_id(event.subject_id()) {
        return Err(unknown_subject());
    }
    let user = queries::get_user_by_id(conn, event.user_id())?.ok_or_else(unknown_user)?;
    let item = queries::get_catalog_item(conn, event.subject_id())?.ok_or_else(unknown_subject)?;

    let expected = PaymentProvider::for_country(&user.country);
    if expected != event.provider() {
        tracing::warn!(
            "User {} in {} paid through {} (expected {})",
            user.id,
            user.country,
            event.provider(),
            expected
        );
    }

    if let ProviderEvent::Payment(payment) = event {
        let plan_mismatch = match payment.kind {
            PaymentKind::Subscription => !item.kind.is_plan(),
            PaymentKind::OneTimePurchase => item.kind.is_plan(),
        };
        if plan_mismatch {
            tracing::warn!(
                "{} payment {} targets {} item {}",
                payment.kind.as_ref(),
                payment.provider_transaction_id,
                item.kind.as_ref(),
                item.id
            );
            return Err(AppError::BadRequest(format!(
                "{} payment cannot be applied to {} item {}",
                payment.kind.as_ref(),
                item.kind.as_ref(),
                item.id
            )));
        }
        if let Some(listed) = item.currency.as_deref() {
            if !listed.eq_ignore_ascii_case(&payment.currency) {
                tracing::warn!(
                    "Payment {} in {} for item {} listed in {}",
                    payment.provider_transaction_id,
                    payment.currency,
                    item.id,
                    listed
                );
            }
        }
    }

    Ok(item)
}

/// Apply a reservation this worker owns. Used by ingress, the repair job and
/// operator re-drives.
pub fn apply_admitted(
    conn: &mut Connection,
    record: &PaymentEventRecord,
    settings: &LedgerSettings,
    now: i64,
) -> Result<ProcessOutcome> {
    match apply_in_transaction(conn, record, settings, now) {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_fatal() => {
            tracing::error!(
                "Halting payment event {} ({}/{}): {}",
                record.id,
                record.provider,
                record.provider_event_id,
                e
            );
            idempotency::mark_failed(conn, &record.id, &e.to_string())?;
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!("Applying payment event {} failed, will retry: {}", record.id, e);
            if let Err(release_err) = idempotency::release(conn, &record.id, &e.to_string(), now) {
                tracing::error!("Could not release {}: {}", record.id, release_err);
            }
            match AppError::from(e) {
                AppError::Conflict(m) => Err(AppError::Internal(m)),
                other => Err(other),
            }
        }
    }
}

fn apply_in_transaction(
    conn: &mut Connection,
    record: &PaymentEventRecord,
    settings: &LedgerSettings,
    now: i64,
) -> std::result::Result<ProcessOutcome, LedgerError> {
    let event = record.event().map_err(|e| {
        LedgerError::InvariantViolation(format!("stored event payload is unreadable: {}", e))
    })?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(LedgerError::from)?;

    // Another worker may have finished it between our claim and this lock.
    let current = queries::get_payment_event(&tx, &record.id)?
        .ok_or_else(|| LedgerError::Store(AppError::Internal(format!("{} vanished", record.id))))?;
    if current.status != AdmissionStatus::Pending {
        return Ok(ProcessOutcome::from_record(ProcessResult::AlreadyProcessed, &current));
    }

    let outcome = match &event {
        ProviderEvent::Payment(payment) => {
            let item = queries::get_catalog_item(&tx, &payment.plan_or_item_id)?.ok_or_else(|| {
                LedgerError::InvariantViolation(format!(
                    "catalog item {} no longer exists",
                    payment.plan_or_item_id
                ))
            })?;
            let delta = entitlements::apply_payment(&tx, payment, &item, now)?;
            let transaction_id = if delta.settle {
                Some(ledger::settle(&tx, &record.id, payment, &item, settings, now)?.id)
            } else {
                None
            };
            if delta.changed() {
                tracing::info!(
                    "Entitlement {}/{}: {} -> {}",
                    payment.user_id,
                    payment.plan_or_item_id,
                    delta.previous.as_ref(),
                    delta.current.as_ref()
                );
            }
            EventOutcome {
                transaction_id,
                entitlement_status: Some(delta.current),
            }
        }
        ProviderEvent::Cancellation(cancellation) => {
            let delta = entitlements::apply_cancellation(&tx, cancellation)?;
            EventOutcome {
                transaction_id: None,
                entitlement_status: Some(delta.current),
            }
        }
        ProviderEvent::Refund(refund) => {
            let reversal = ledger::refund(&tx, refund, now)?;
            let delta = entitlements::apply_refund(&tx, refund)?;
            EventOutcome {
                transaction_id: Some(reversal.id),
                entitlement_status: Some(delta.current),
            }
        }
    };

    idempotency::mark_applied(&tx, &record.id, &outcome, now)?;
    tx.commit().map_err(LedgerError::from)?;

    Ok(ProcessOutcome {
        result: ProcessResult::Applied,
        event_id: Some(record.id.clone()),
        event_status: Some(AdmissionStatus::Applied),
        outcome,
    })
}

/// Re-drive a halted event after an operator fixed its cause.
pub fn redrive_failed(
    conn: &mut Connection,
    event_id: &str,
    settings: &LedgerSettings,
    now: i64,
) -> Result<ProcessOutcome> {
    if !queries::reset_failed_payment_event(conn, event_id, now)? {
        return match queries::get_payment_event(conn, event_id)? {
            Some(record) => Err(AppError::Conflict(format!(
                "payment event is {}, only failed events can be re-driven",
                record.status.as_ref()
            ))),
            None => Err(AppError::NotFound(msg::NOT_FOUND.into())),
        };
    }
    let record = idempotency::reclaim(conn, event_id, settings.admission_lease_secs, now)?
        .ok_or_else(|| AppError::Conflict("payment event was claimed by another worker".into()))?;
    apply_admitted(conn, &record, settings, now)
}
