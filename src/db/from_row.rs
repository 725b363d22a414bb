//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to describe how they are built from a row
//! selected with the matching `*_COLS` constant.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

fn parse_opt_enum<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        Some(s) => s.parse::<T>().map(Some).map_err(|_| {
            rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
        }),
        None => Ok(None),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, name, country, role, created_at";

pub const API_KEY_COLS: &str =
    "id, user_id, name, key_prefix, created_at, last_used_at, revoked_at";

pub const CATALOG_ITEM_COLS: &str = "id, kind, title, creator_id, price, currency, billing_interval, video_url, external_video_id, created_at";

pub const PAYMENT_EVENT_COLS: &str = "id, provider, provider_event_id, event_kind, payload, status, attempts, lease_expires_at, outcome_transaction_id, outcome_entitlement_status, last_error, received_at, applied_at";

pub const ENTITLEMENT_COLS: &str = "id, user_id, subject_id, status, activated_at, expires_at, canceled_at, last_event_at, version, superseded_at, created_at, updated_at";

pub const TRANSACTION_COLS: &str = "id, payment_event_ref, provider, user_id, subject_id, creator_id, gross_amount, currency, creator_share_ratio, platform_share_ratio, creator_revenue, platform_revenue, reverses_transaction_id, reason, settled_at";

pub const PAYOUT_COLS: &str = "id, creator_id, payment_method, amount, currency, destination, status, rejection_reason, requested_at, resolved_at, updated_at";

pub const PROCESSING_JOB_COLS: &str = "id, item_id, external_job_id, source_ref, operations, status, result_ref, external_video_id, error, created_at, updated_at";

pub const AUDIT_LOG_COLS: &str = "id, timestamp, actor_type, actor_id, action, resource_type, resource_id, details, ip_address, user_agent";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            country: row.get(2)?,
            role: parse_enum(row, 3, "role")?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for ApiKey {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ApiKey {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            prefix: row.get(3)?,
            created_at: row.get(4)?,
            last_used_at: row.get(5)?,
            revoked_at: row.get(6)?,
        })
    }
}

impl FromRow for CatalogItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CatalogItem {
            id: row.get(0)?,
            kind: parse_enum(row, 1, "kind")?,
            title: row.get(2)?,
            creator_id: row.get(3)?,
            price: row.get(4)?,
            currency: row.get(5)?,
            billing_interval: parse_opt_enum(row, 6, "billing_interval")?,
            video_url: row.get(7)?,
            external_video_id: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for PaymentEventRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentEventRecord {
            id: row.get(0)?,
            provider: parse_enum(row, 1, "provider")?,
            provider_event_id: row.get(2)?,
            event_kind: row.get(3)?,
            payload: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            attempts: row.get(6)?,
            lease_expires_at: row.get(7)?,
            outcome: EventOutcome {
                transaction_id: row.get(8)?,
                entitlement_status: parse_opt_enum(row, 9, "outcome_entitlement_status")?,
            },
            last_error: row.get(10)?,
            received_at: row.get(11)?,
            applied_at: row.get(12)?,
        })
    }
}

impl FromRow for Entitlement {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Entitlement {
            id: row.get(0)?,
            user_id: row.get(1)?,
            subject_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            activated_at: row.get(4)?,
            expires_at: row.get(5)?,
            canceled_at: row.get(6)?,
            last_event_at: row.get(7)?,
            version: row.get(8)?,
            superseded_at: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for Transaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Transaction {
            id: row.get(0)?,
            payment_event_ref: row.get(1)?,
            provider: parse_enum(row, 2, "provider")?,
            user_id: row.get(3)?,
            subject_id: row.get(4)?,
            creator_id: row.get(5)?,
            gross_amount: row.get(6)?,
            currency: row.get(7)?,
            creator_share_ratio: row.get(8)?,
            platform_share_ratio: row.get(9)?,
            creator_revenue: row.get(10)?,
            platform_revenue: row.get(11)?,
            reverses_transaction_id: row.get(12)?,
            reason: row.get(13)?,
            settled_at: row.get(14)?,
        })
    }
}

impl FromRow for PayoutRequest {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PayoutRequest {
            id: row.get(0)?,
            creator_id: row.get(1)?,
            payment_method: parse_enum(row, 2, "payment_method")?,
            amount: row.get(3)?,
            currency: row.get(4)?,
            destination: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            rejection_reason: row.get(7)?,
            requested_at: row.get(8)?,
            resolved_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for ProcessingJob {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProcessingJob {
            id: row.get(0)?,
            item_id: row.get(1)?,
            external_job_id: row.get(2)?,
            source_ref: row.get(3)?,
            operations: parse_json(row, 4)?,
            status: parse_enum(row, 5, "status")?,
            result_ref: row.get(6)?,
            external_video_id: row.get(7)?,
            error: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for AuditLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let details: Option<String> = row.get(7)?;
        Ok(AuditLog {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            actor_type: parse_enum(row, 2, "actor_type")?,
            actor_id: row.get(3)?,
            action: row.get(4)?,
            resource_type: row.get(5)?,
            resource_id: row.get(6)?,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
            ip_address: row.get(8)?,
            user_agent: row.get(9)?,
        })
    }
}

pub const SHARE_RATIO_OVERRIDE_COLS: &str = "creator_id, creator_share, updated_at";

impl FromRow for ShareRatioOverride {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ShareRatioOverride {
            creator_id: row.get(0)?,
            creator_share: row.get(1)?,
            updated_at: row.get(2)?,
        })
    }
}
