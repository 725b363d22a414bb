//! Maintenance loop: re-drives stalled reservations and expires lapsed
//! subscriptions.

use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::config::LedgerSettings;
use crate::db::{AppState, queries};
use crate::entitlements;
use crate::error::Result;
use crate::idempotency;
use crate::models::AdmissionStatus;
use crate::pipeline::{self, ProcessResult};

/// Events re-driven per pass. The rest wait for the next tick.
const REPAIR_BATCH: i64 = 100;

#[derive(Debug, Default, Clone, Serialize)]
pub struct RepairReport {
    /// Stalled reservations that were applied on this pass.
    pub redriven: usize,
    /// Stalled reservations that hit a ledger invariant and were halted.
    pub halted: usize,
    /// Stalled reservations left for a later pass (lease taken, transient error).
    pub deferred: usize,
    pub expired_entitlements: usize,
}

pub fn run_repair_pass(conn: &mut Connection, settings: &LedgerSettings, now: i64) -> Result<RepairReport> {
    let mut report = RepairReport::default();

    for record in idempotency::stalled(conn, settings.repair_grace_secs, now, REPAIR_BATCH)? {
        let Some(claimed) = idempotency::reclaim(conn, &record.id, settings.admission_lease_secs, now)? else {
            report.deferred += 1;
            continue;
        };

        tracing::info!(
            "Re-driving stalled event {} ({}/{}, attempt {})",
            claimed.id,
            claimed.provider,
            claimed.provider_event_id,
            claimed.attempts
        );
        match pipeline::apply_admitted(conn, &claimed, settings, now) {
            Ok(outcome) if outcome.result == ProcessResult::Applied => report.redriven += 1,
            Ok(_) => report.deferred += 1,
            Err(e) => {
                let halted = queries::get_payment_event(conn, &claimed.id)?
                    .is_some_and(|r| r.status == AdmissionStatus::Failed);
                if halted {
                    report.halted += 1;
                } else {
                    tracing::warn!("Repair of {} deferred: {}", claimed.id, e);
                    report.deferred += 1;
                }
            }
        }
    }

    report.expired_entitlements =
        entitlements::expire_due(conn, settings.expiry_grace_secs, now, REPAIR_BATCH)?;

    if report.redriven + report.halted + report.expired_entitlements > 0 {
        tracing::info!(
            "Repair pass: {} re-driven, {} halted, {} deferred, {} entitlements expired",
            report.redriven,
            report.halted,
            report.deferred,
            report.expired_entitlements
        );
    }
    Ok(report)
}

pub fn spawn_repair_task(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs.max(1));

        loop {
            tokio::time::sleep(interval).await;

            let state = state.clone();
            let result = tokio::task::spawn_blocking(move || -> Result<RepairReport> {
                let mut conn = state.db.get()?;
                run_repair_pass(&mut conn, &state.ledger, queries::now())
            })
            .await;

            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!("Repair pass failed: {}", e),
                Err(e) => tracing::error!("Repair task panicked: {}", e),
            }
        }
    });

    tracing::info!("Background repair task started (runs every {}s)", interval_secs);
}
