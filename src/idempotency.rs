//! Idempotency store for provider deliveries.
//!
//! Every normalized event is reserved under `(provider, provider_event_id)`
//! before any effect is applied. The reservation is a `payment_events` row
//! carrying the canonical event, so a reservation that never reaches
//! `applied` can be re-driven later from what was stored.
//!
//! A reservation holds a lease. While the lease is live, duplicates are told
//! the event is in flight; once it lapses, the next delivery (or the repair
//! job) may reclaim it with a compare-and-swap on the row.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::{AdmissionStatus, EventOutcome, PaymentEventRecord, ProviderEvent};

/// Result of trying to reserve an event for processing.
#[derive(Debug, Clone)]
pub enum Admission {
    /// Caller owns the reservation and must apply the event.
    Admitted(PaymentEventRecord),
    /// Applied or halted earlier. The record carries the recorded outcome.
    AlreadyProcessed(PaymentEventRecord),
    /// Another worker holds a live lease on this key.
    InFlight(PaymentEventRecord),
}

impl Admission {
    pub fn record(&self) -> &PaymentEventRecord {
        match self {
            Admission::Admitted(r) | Admission::AlreadyProcessed(r) | Admission::InFlight(r) => r,
        }
    }
}

/// Reserve `event` or report what happened to an earlier delivery of it.
pub fn admit(conn: &Connection, event: &ProviderEvent, lease_secs: i64, now: i64) -> Result<Admission> {
    let id = EntityType::PaymentEvent.gen_id();
    let lease_expires_at = now + lease_secs;

    if queries::insert_payment_event_if_absent(conn, &id, event, lease_expires_at, now)? {
        let record = queries::get_payment_event(conn, &id)?
            .ok_or_else(|| AppError::Internal(format!("reservation {} vanished", id)))?;
        tracing::debug!(
            "Admitted {} event {}/{} as {}",
            record.event_kind,
            record.provider,
            record.provider_event_id,
            record.id
        );
        return Ok(Admission::Admitted(record));
    }

    let existing = queries::get_payment_event_by_key(conn, event.provider(), event.provider_event_id())?
        .ok_or_else(|| {
            AppError::Internal(format!(
                "reservation for {}/{} not found after conflict",
                event.provider(),
                event.provider_event_id()
            ))
        })?;

    match existing.status {
        AdmissionStatus::Applied | AdmissionStatus::Failed => {
            tracing::debug!(
                "Duplicate delivery of {}/{} ({})",
                existing.provider,
                existing.provider_event_id,
                existing.status.as_ref()
            );
            Ok(Admission::AlreadyProcessed(existing))
        }
        AdmissionStatus::Pending => match reclaim(conn, &existing.id, lease_secs, now)? {
            Some(record) => {
                tracing::info!(
                    "Reclaimed expired reservation {} (attempt {})",
                    record.id,
                    record.attempts
                );
                Ok(Admission::Admitted(record))
            }
            None => Ok(Admission::InFlight(existing)),
        },
    }
}

/// Take over a pending reservation whose lease has lapsed.
/// Returns `None` if the lease is still live or someone else won the race.
pub fn reclaim(conn: &Connection, id: &str, lease_secs: i64, now: i64) -> Result<Option<PaymentEventRecord>> {
    if !queries::claim_payment_event(conn, id, now, now + lease_secs)? {
        return Ok(None);
    }
    queries::get_payment_event(conn, id)
}

pub fn mark_applied(conn: &Connection, id: &str, outcome: &EventOutcome, now: i64) -> Result<()> {
    if !queries::mark_payment_event_applied(conn, id, outcome, now)? {
        return Err(AppError::Conflict(format!(
            "payment event {} is no longer pending",
            id
        )));
    }
    Ok(())
}

/// Halt the event for operator attention. Duplicates will report the failure.
pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> Result<()> {
    queries::mark_payment_event_failed(conn, id, error)?;
    Ok(())
}

/// Keep the reservation pending but let the next attempt claim it immediately.
pub fn release(conn: &Connection, id: &str, error: &str, now: i64) -> Result<()> {
    queries::release_payment_event(conn, id, error, now)?;
    Ok(())
}

/// Reservations older than `grace_secs` that still have no completed effect.
pub fn stalled(conn: &Connection, grace_secs: i64, now: i64, limit: i64) -> Result<Vec<PaymentEventRecord>> {
    queries::list_stalled_payment_events(conn, now - grace_secs, now, limit)
}
