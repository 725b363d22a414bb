use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, types::Value};
use uuid::Uuid;

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;
use crate::payments::PaymentProvider;
use crate::util::hash_secret;

use super::from_row::{
    API_KEY_COLS, AUDIT_LOG_COLS, CATALOG_ITEM_COLS, ENTITLEMENT_COLS, FromRow,
    PAYMENT_EVENT_COLS, PAYOUT_COLS, PROCESSING_JOB_COLS, SHARE_RATIO_OVERRIDE_COLS,
    TRANSACTION_COLS, USER_COLS, query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Execute the update and return the updated entity using RETURNING clause.
    /// Returns None if no rows matched or there was nothing to update.
    fn execute_returning<T: FromRow>(mut self, conn: &Connection, returning_cols: &str) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? RETURNING {}",
            self.table,
            sets.join(", "),
            returning_cols
        );
        conn.query_row(&sql, rusqlite::params_from_iter(values), T::from_row)
            .optional()
            .map_err(Into::into)
    }
}

fn count(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<i64> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = EntityType::User.gen_id();
    let now = now();
    let country = input.country.trim().to_ascii_uppercase();

    conn.execute(
        "INSERT INTO users (id, name, country, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &input.name, &country, input.role.as_ref(), now],
    )?;

    Ok(User {
        id,
        name: input.name.clone(),
        country,
        role: input.role,
        created_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn list_users_paginated(conn: &Connection, limit: i64, offset: i64) -> Result<(Vec<User>, i64)> {
    let total = count(conn, "SELECT COUNT(*) FROM users", &[])?;
    let users = query_all(
        conn,
        &format!(
            "SELECT {} FROM users ORDER BY created_at DESC, id LIMIT ?1 OFFSET ?2",
            USER_COLS
        ),
        &[&limit, &offset],
    )?;
    Ok((users, total))
}

pub fn count_users_with_role(conn: &Connection, role: UserRole) -> Result<i64> {
    count(conn, "SELECT COUNT(*) FROM users WHERE role = ?1", &[&role.as_ref()])
}

// ============ API Keys ============

/// Generate a new API key. Only its hash is persisted.
pub fn generate_api_key() -> String {
    format!("rpk_{}", Uuid::new_v4().as_simple())
}

pub fn create_api_key(conn: &Connection, user_id: &str, name: &str) -> Result<(ApiKey, String)> {
    let id = EntityType::ApiKey.gen_id();
    let key = generate_api_key();
    let prefix: String = key.chars().take(12).collect();
    let now = now();

    conn.execute(
        "INSERT INTO api_keys (id, user_id, name, key_prefix, key_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, user_id, name, &prefix, hash_secret(&key), now],
    )?;

    let record = ApiKey {
        id,
        user_id: user_id.to_string(),
        name: name.to_string(),
        prefix,
        created_at: now,
        last_used_at: None,
        revoked_at: None,
    };
    Ok((record, key))
}

/// Resolve a bearer key to its user, touching `last_used_at`.
pub fn get_user_by_api_key(conn: &Connection, api_key: &str) -> Result<Option<(User, ApiKey)>> {
    let key: Option<ApiKey> = query_one(
        conn,
        &format!(
            "SELECT {} FROM api_keys WHERE key_hash = ?1 AND revoked_at IS NULL",
            API_KEY_COLS
        ),
        &[&hash_secret(api_key)],
    )?;
    let Some(key) = key else {
        return Ok(None);
    };

    let Some(user) = get_user_by_id(conn, &key.user_id)? else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
        params![now(), &key.id],
    )?;

    Ok(Some((user, key)))
}

pub fn list_api_keys(conn: &Connection, user_id: &str) -> Result<Vec<ApiKey>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM api_keys WHERE user_id = ?1 ORDER BY created_at DESC",
            API_KEY_COLS
        ),
        &[&user_id],
    )
}

pub fn revoke_api_key(conn: &Connection, user_id: &str, key_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2 AND user_id = ?3 AND revoked_at IS NULL",
        params![now(), key_id, user_id],
    )?;
    Ok(affected > 0)
}

// ============ Catalog ============

pub fn create_catalog_item(conn: &Connection, input: &CreateCatalogItem) -> Result<CatalogItem> {
    let id = EntityType::CatalogItem.gen_id();
    let now = now();
    let currency = input.currency.as_ref().map(|c| c.trim().to_ascii_uppercase());

    conn.execute(
        "INSERT INTO catalog_items (id, kind, title, creator_id, price, currency, billing_interval, video_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            &id,
            input.kind.as_ref(),
            &input.title,
            &input.creator_id,
            input.price,
            &currency,
            input.billing_interval.as_ref().map(|b| b.as_ref()),
            &input.video_url,
            now
        ],
    )?;

    Ok(CatalogItem {
        id,
        kind: input.kind,
        title: input.title.clone(),
        creator_id: input.creator_id.clone(),
        price: input.price,
        currency,
        billing_interval: input.billing_interval,
        video_url: input.video_url.clone(),
        external_video_id: None,
        created_at: now,
    })
}

pub fn get_catalog_item(conn: &Connection, id: &str) -> Result<Option<CatalogItem>> {
    query_one(
        conn,
        &format!("SELECT {} FROM catalog_items WHERE id = ?1", CATALOG_ITEM_COLS),
        &[&id],
    )
}

pub fn list_catalog_items_paginated(
    conn: &Connection,
    creator_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<CatalogItem>, i64)> {
    let total = count(
        conn,
        "SELECT COUNT(*) FROM catalog_items WHERE (?1 IS NULL OR creator_id = ?1)",
        &[&creator_id],
    )?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM catalog_items WHERE (?1 IS NULL OR creator_id = ?1)
             ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3",
            CATALOG_ITEM_COLS
        ),
        &[&creator_id, &limit, &offset],
    )?;
    Ok((items, total))
}

pub fn update_catalog_item(
    conn: &Connection,
    id: &str,
    input: &UpdateCatalogItem,
) -> Result<Option<CatalogItem>> {
    UpdateBuilder::new("catalog_items", id)
        .with_updated_at()
        .set_opt("title", input.title.clone())
        .set_opt("price", input.price)
        .set_opt(
            "currency",
            input.currency.as_ref().map(|c| c.trim().to_ascii_uppercase()),
        )
        .set_opt("video_url", input.video_url.clone())
        .execute_returning(conn, CATALOG_ITEM_COLS)
}

/// Attach the hosted video produced by the media pipeline.
pub fn set_catalog_item_video(
    conn: &Connection,
    id: &str,
    external_video_id: &str,
    video_url: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE catalog_items SET external_video_id = ?1, video_url = ?2, updated_at = ?3 WHERE id = ?4",
        params![external_video_id, video_url, now(), id],
    )?;
    Ok(affected > 0)
}

pub fn add_catalog_inclusion(conn: &Connection, parent_id: &str, child_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO catalog_inclusions (parent_id, child_id, created_at) VALUES (?1, ?2, ?3)",
        params![parent_id, child_id, now()],
    )?;
    Ok(affected > 0)
}

pub fn remove_catalog_inclusion(conn: &Connection, parent_id: &str, child_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM catalog_inclusions WHERE parent_id = ?1 AND child_id = ?2",
        params![parent_id, child_id],
    )?;
    Ok(affected > 0)
}

pub fn list_included_items(conn: &Connection, parent_id: &str) -> Result<Vec<CatalogItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM catalog_items WHERE id IN
               (SELECT child_id FROM catalog_inclusions WHERE parent_id = ?1)
             ORDER BY created_at, id",
            CATALOG_ITEM_COLS
        ),
        &[&parent_id],
    )
}

/// The item itself plus every bundle or plan that (transitively) includes it.
pub fn subsuming_subject_ids(conn: &Connection, item_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE ancestors(id) AS (
             SELECT ?1
             UNION
             SELECT ci.parent_id FROM catalog_inclusions ci JOIN ancestors a ON ci.child_id = a.id
         )
         SELECT id FROM ancestors",
    )?;
    let ids = stmt
        .query_map(params![item_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Would adding `parent -> child` close a cycle?
pub fn inclusion_creates_cycle(conn: &Connection, parent_id: &str, child_id: &str) -> Result<bool> {
    Ok(subsuming_subject_ids(conn, parent_id)?
        .iter()
        .any(|id| id == child_id))
}

// ============ Share Ratios ============

pub fn get_share_ratio_override(conn: &Connection, creator_id: &str) -> Result<Option<ShareRatioOverride>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM share_ratio_overrides WHERE creator_id = ?1",
            SHARE_RATIO_OVERRIDE_COLS
        ),
        &[&creator_id],
    )
}

pub fn set_share_ratio_override(
    conn: &Connection,
    creator_id: &str,
    creator_share: f64,
) -> Result<ShareRatioOverride> {
    let now = now();
    conn.execute(
        "INSERT INTO share_ratio_overrides (creator_id, creator_share, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(creator_id) DO UPDATE SET creator_share = excluded.creator_share, updated_at = excluded.updated_at",
        params![creator_id, creator_share, now],
    )?;
    Ok(ShareRatioOverride {
        creator_id: creator_id.to_string(),
        creator_share,
        updated_at: now,
    })
}

pub fn clear_share_ratio_override(conn: &Connection, creator_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM share_ratio_overrides WHERE creator_id = ?1",
        params![creator_id],
    )?;
    Ok(affected > 0)
}

pub fn list_share_ratio_overrides(conn: &Connection) -> Result<Vec<ShareRatioOverride>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM share_ratio_overrides ORDER BY creator_id",
            SHARE_RATIO_OVERRIDE_COLS
        ),
        &[],
    )
}

// ============ Payment Events (idempotency store) ============

/// Reserve `(provider, provider_event_id)`. Returns false if the key already exists.
pub fn insert_payment_event_if_absent(
    conn: &Connection,
    id: &str,
    event: &ProviderEvent,
    lease_expires_at: i64,
    now: i64,
) -> Result<bool> {
    let payload = serde_json::to_string(event)?;
    let affected = conn.execute(
        "INSERT OR IGNORE INTO payment_events
            (id, provider, provider_event_id, event_kind, payload, status, attempts, lease_expires_at, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 1, ?6, ?7)",
        params![
            id,
            event.provider().as_str(),
            event.provider_event_id(),
            event.event_kind(),
            &payload,
            lease_expires_at,
            now
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_payment_event(conn: &Connection, id: &str) -> Result<Option<PaymentEventRecord>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payment_events WHERE id = ?1", PAYMENT_EVENT_COLS),
        &[&id],
    )
}

pub fn get_payment_event_by_key(
    conn: &Connection,
    provider: PaymentProvider,
    provider_event_id: &str,
) -> Result<Option<PaymentEventRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_events WHERE provider = ?1 AND provider_event_id = ?2",
            PAYMENT_EVENT_COLS
        ),
        &[&provider.as_str(), &provider_event_id],
    )
}

/// Compare-and-swap on an expired lease. Only one claimant can win.
pub fn claim_payment_event(
    conn: &Connection,
    id: &str,
    now: i64,
    lease_expires_at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_events SET attempts = attempts + 1, lease_expires_at = ?3
         WHERE id = ?1 AND status = 'pending' AND lease_expires_at <= ?2",
        params![id, now, lease_expires_at],
    )?;
    Ok(affected > 0)
}

pub fn mark_payment_event_applied(
    conn: &Connection,
    id: &str,
    outcome: &EventOutcome,
    now: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_events
         SET status = 'applied', outcome_transaction_id = ?2, outcome_entitlement_status = ?3,
             last_error = NULL, applied_at = ?4
         WHERE id = ?1 AND status = 'pending'",
        params![
            id,
            &outcome.transaction_id,
            outcome.entitlement_status.as_ref().map(|s| s.as_ref()),
            now
        ],
    )?;
    Ok(affected > 0)
}

pub fn mark_payment_event_failed(conn: &Connection, id: &str, error: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_events SET status = 'failed', last_error = ?2 WHERE id = ?1 AND status = 'pending'",
        params![id, error],
    )?;
    Ok(affected > 0)
}

/// Record a transient apply error and release the lease so a retry can reclaim it.
pub fn release_payment_event(conn: &Connection, id: &str, error: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_events SET last_error = ?2, lease_expires_at = ?3 WHERE id = ?1 AND status = 'pending'",
        params![id, error, now],
    )?;
    Ok(affected > 0)
}

/// Move a failed event back to pending so it can be re-driven.
pub fn reset_failed_payment_event(conn: &Connection, id: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_events SET status = 'pending', lease_expires_at = ?2 WHERE id = ?1 AND status = 'failed'",
        params![id, now],
    )?;
    Ok(affected > 0)
}

/// Pending events older than the grace period whose lease has run out.
pub fn list_stalled_payment_events(
    conn: &Connection,
    received_before: i64,
    now: i64,
    limit: i64,
) -> Result<Vec<PaymentEventRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_events
             WHERE status = 'pending' AND received_at <= ?1 AND lease_expires_at <= ?2
             ORDER BY received_at LIMIT ?3",
            PAYMENT_EVENT_COLS
        ),
        &[&received_before, &now, &limit],
    )
}

pub fn list_payment_events_paginated(
    conn: &Connection,
    status: Option<AdmissionStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PaymentEventRecord>, i64)> {
    let status = status.map(|s| s.as_ref().to_string());
    let total = count(
        conn,
        "SELECT COUNT(*) FROM payment_events WHERE (?1 IS NULL OR status = ?1)",
        &[&status],
    )?;
    let events = query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_events WHERE (?1 IS NULL OR status = ?1)
             ORDER BY received_at DESC, id LIMIT ?2 OFFSET ?3",
            PAYMENT_EVENT_COLS
        ),
        &[&status, &limit, &offset],
    )?;
    Ok((events, total))
}

/// Applied succeeded payments that have no ledger entry.
pub fn list_unsettled_applied_payments(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT pe.id FROM payment_events pe
         WHERE pe.status = 'applied'
           AND pe.event_kind = 'payment'
           AND json_extract(pe.payload, '$.observed_status') = 'succeeded'
           AND NOT EXISTS (SELECT 1 FROM transactions t WHERE t.payment_event_ref = pe.id)
         ORDER BY pe.received_at",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

// ============ Entitlements ============

pub fn get_current_entitlement(
    conn: &Connection,
    user_id: &str,
    subject_id: &str,
) -> Result<Option<Entitlement>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM entitlements
             WHERE user_id = ?1 AND subject_id = ?2 AND superseded_at IS NULL",
            ENTITLEMENT_COLS
        ),
        &[&user_id, &subject_id],
    )
}

pub fn insert_entitlement(conn: &Connection, e: &Entitlement) -> Result<()> {
    conn.execute(
        "INSERT INTO entitlements
            (id, user_id, subject_id, status, activated_at, expires_at, canceled_at, last_event_at, version, superseded_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &e.id,
            &e.user_id,
            &e.subject_id,
            e.status.as_ref(),
            e.activated_at,
            e.expires_at,
            e.canceled_at,
            e.last_event_at,
            e.version,
            e.superseded_at,
            e.created_at,
            e.updated_at
        ],
    )?;
    Ok(())
}

/// Write mutable lifecycle fields if the row is still at `expected_version`.
pub fn update_entitlement_cas(conn: &Connection, e: &Entitlement, expected_version: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE entitlements
         SET status = ?3, expires_at = ?4, canceled_at = ?5, last_event_at = ?6,
             version = version + 1, updated_at = ?7
         WHERE id = ?1 AND version = ?2 AND superseded_at IS NULL",
        params![
            &e.id,
            expected_version,
            e.status.as_ref(),
            e.expires_at,
            e.canceled_at,
            e.last_event_at,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn supersede_entitlement(conn: &Connection, id: &str, expected_version: i64, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE entitlements SET superseded_at = ?3, version = version + 1, updated_at = ?3
         WHERE id = ?1 AND version = ?2 AND superseded_at IS NULL",
        params![id, expected_version, now],
    )?;
    Ok(affected > 0)
}

pub fn list_current_entitlements_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Entitlement>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM entitlements WHERE user_id = ?1 AND superseded_at IS NULL
             ORDER BY activated_at DESC, id",
            ENTITLEMENT_COLS
        ),
        &[&user_id],
    )
}

/// Most recent current entitlement to a plan, if any.
pub fn get_current_plan_entitlement(conn: &Connection, user_id: &str) -> Result<Option<Entitlement>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM entitlements
             WHERE user_id = ?1 AND superseded_at IS NULL
               AND subject_id IN (SELECT id FROM catalog_items WHERE kind = 'plan')
             ORDER BY CASE status WHEN 'active' THEN 0 WHEN 'past_due' THEN 1 ELSE 2 END,
                      activated_at DESC
             LIMIT 1",
            ENTITLEMENT_COLS
        ),
        &[&user_id],
    )
}

/// Current subscriptions whose paid period ended before `cutoff`, plus
/// user-canceled ones whose period ended before `now`.
pub fn list_entitlements_due_for_expiry(
    conn: &Connection,
    cutoff: i64,
    now: i64,
    limit: i64,
) -> Result<Vec<Entitlement>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM entitlements
             WHERE superseded_at IS NULL AND status IN ('active', 'past_due')
               AND expires_at IS NOT NULL
               AND (expires_at <= ?1 OR (canceled_at IS NOT NULL AND expires_at <= ?2))
             ORDER BY expires_at LIMIT ?3",
            ENTITLEMENT_COLS
        ),
        &[&cutoff, &now, &limit],
    )
}

/// Does `user_id` hold an active, unexpired entitlement to any of `subject_ids`?
pub fn has_active_entitlement(
    conn: &Connection,
    user_id: &str,
    subject_ids: &[String],
    now: i64,
) -> Result<bool> {
    if subject_ids.is_empty() {
        return Ok(false);
    }
    let placeholders = vec!["?"; subject_ids.len()].join(", ");
    let sql = format!(
        "SELECT EXISTS(
             SELECT 1 FROM entitlements
             WHERE user_id = ? AND superseded_at IS NULL AND status = 'active'
               AND (expires_at IS NULL OR expires_at > ?)
               AND subject_id IN ({}))",
        placeholders
    );
    let mut values: Vec<Value> = vec![user_id.to_string().into(), now.into()];
    values.extend(subject_ids.iter().map(|s| Value::from(s.clone())));
    let exists: bool = conn.query_row(&sql, rusqlite::params_from_iter(values), |row| row.get(0))?;
    Ok(exists)
}

// ============ Transactions (ledger) ============

pub fn insert_transaction(conn: &Connection, t: &Transaction) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions
            (id, payment_event_ref, provider, user_id, subject_id, creator_id, gross_amount, currency,
             creator_share_ratio, platform_share_ratio, creator_revenue, platform_revenue,
             reverses_transaction_id, reason, settled_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            &t.id,
            &t.payment_event_ref,
            t.provider.as_str(),
            &t.user_id,
            &t.subject_id,
            &t.creator_id,
            t.gross_amount,
            &t.currency,
            t.creator_share_ratio,
            t.platform_share_ratio,
            t.creator_revenue,
            t.platform_revenue,
            &t.reverses_transaction_id,
            &t.reason,
            t.settled_at
        ],
    )?;
    Ok(())
}

pub fn get_transaction(conn: &Connection, id: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLS),
        &[&id],
    )
}

pub fn get_transaction_by_event_ref(conn: &Connection, payment_event_ref: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE payment_event_ref = ?1",
            TRANSACTION_COLS
        ),
        &[&payment_event_ref],
    )
}

pub fn get_reversal_of(conn: &Connection, transaction_id: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE reverses_transaction_id = ?1",
            TRANSACTION_COLS
        ),
        &[&transaction_id],
    )
}

pub fn list_transactions_paginated(
    conn: &Connection,
    creator_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Transaction>, i64)> {
    let total = count(
        conn,
        "SELECT COUNT(*) FROM transactions WHERE (?1 IS NULL OR creator_id = ?1)",
        &[&creator_id],
    )?;
    let txns = query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE (?1 IS NULL OR creator_id = ?1)
             ORDER BY settled_at DESC, id LIMIT ?2 OFFSET ?3",
            TRANSACTION_COLS
        ),
        &[&creator_id, &limit, &offset],
    )?;
    Ok((txns, total))
}

pub fn list_all_transactions(conn: &Connection) -> Result<Vec<Transaction>> {
    query_all(
        conn,
        &format!("SELECT {} FROM transactions ORDER BY settled_at, id", TRANSACTION_COLS),
        &[],
    )
}

/// Per-currency sums over the ledger for one creator. `start`/`end` are inclusive.
pub fn revenue_by_currency(
    conn: &Connection,
    creator_id: &str,
    period: &RevenuePeriod,
) -> Result<Vec<CurrencyRevenue>> {
    let mut stmt = conn.prepare(
        "SELECT currency, SUM(gross_amount), SUM(creator_revenue), SUM(platform_revenue), COUNT(*)
         FROM transactions
         WHERE creator_id = ?1
           AND (?2 IS NULL OR settled_at >= ?2)
           AND (?3 IS NULL OR settled_at <= ?3)
         GROUP BY currency
         ORDER BY currency",
    )?;
    let rows = stmt
        .query_map(params![creator_id, period.start, period.end], |row| {
            Ok(CurrencyRevenue {
                currency: row.get(0)?,
                gross_amount: row.get(1)?,
                creator_revenue: row.get(2)?,
                platform_revenue: row.get(3)?,
                transaction_count: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All creator revenue ever accrued in one currency, reversals included.
pub fn accrued_creator_revenue(conn: &Connection, creator_id: &str, currency: &str) -> Result<f64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(creator_revenue), 0.0) FROM transactions
         WHERE creator_id = ?1 AND currency = ?2",
        params![creator_id, currency],
        |row| row.get(0),
    )?)
}

// ============ Payouts ============

pub fn insert_payout(conn: &Connection, p: &PayoutRequest) -> Result<()> {
    conn.execute(
        "INSERT INTO payout_requests
            (id, creator_id, payment_method, amount, currency, destination, status, rejection_reason, requested_at, resolved_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &p.id,
            &p.creator_id,
            p.payment_method.as_ref(),
            p.amount,
            &p.currency,
            &p.destination,
            p.status.as_ref(),
            &p.rejection_reason,
            p.requested_at,
            p.resolved_at,
            p.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_payout(conn: &Connection, id: &str) -> Result<Option<PayoutRequest>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payout_requests WHERE id = ?1", PAYOUT_COLS),
        &[&id],
    )
}

pub fn list_payouts_paginated(
    conn: &Connection,
    creator_id: Option<&str>,
    status: Option<PayoutStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PayoutRequest>, i64)> {
    let status = status.map(|s| s.as_ref().to_string());
    let total = count(
        conn,
        "SELECT COUNT(*) FROM payout_requests
         WHERE (?1 IS NULL OR creator_id = ?1) AND (?2 IS NULL OR status = ?2)",
        &[&creator_id, &status],
    )?;
    let payouts = query_all(
        conn,
        &format!(
            "SELECT {} FROM payout_requests
             WHERE (?1 IS NULL OR creator_id = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY requested_at DESC, id LIMIT ?3 OFFSET ?4",
            PAYOUT_COLS
        ),
        &[&creator_id, &status, &limit, &offset],
    )?;
    Ok((payouts, total))
}

/// Amount held by pending, processing and paid requests.
pub fn reserved_payout_total(conn: &Connection, creator_id: &str, currency: &str) -> Result<f64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(amount), 0.0) FROM payout_requests
         WHERE creator_id = ?1 AND currency = ?2 AND status <> 'rejected'",
        params![creator_id, currency],
        |row| row.get(0),
    )?)
}

/// Move a payout from `from` to `to`. Returns None if it was no longer in `from`.
pub fn transition_payout(
    conn: &Connection,
    id: &str,
    from: PayoutStatus,
    to: PayoutStatus,
    rejection_reason: Option<&str>,
    now: i64,
) -> Result<Option<PayoutRequest>> {
    let resolved_at = to.is_terminal().then_some(now);
    conn.query_row(
        &format!(
            "UPDATE payout_requests
             SET status = ?3, rejection_reason = COALESCE(?4, rejection_reason),
                 resolved_at = COALESCE(?5, resolved_at), updated_at = ?6
             WHERE id = ?1 AND status = ?2
             RETURNING {}",
            PAYOUT_COLS
        ),
        params![id, from.as_ref(), to.as_ref(), rejection_reason, resolved_at, now],
        PayoutRequest::from_row,
    )
    .optional()
    .map_err(Into::into)
}

// ============ Processing Jobs ============

pub fn insert_processing_job(conn: &Connection, job: &ProcessingJob) -> Result<()> {
    conn.execute(
        "INSERT INTO processing_jobs
            (id, item_id, external_job_id, source_ref, operations, status, result_ref, external_video_id, error, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &job.id,
            &job.item_id,
            &job.external_job_id,
            &job.source_ref,
            serde_json::to_string(&job.operations)?,
            job.status.as_ref(),
            &job.result_ref,
            &job.external_video_id,
            &job.error,
            job.created_at,
            job.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_processing_job(conn: &Connection, id: &str) -> Result<Option<ProcessingJob>> {
    query_one(
        conn,
        &format!("SELECT {} FROM processing_jobs WHERE id = ?1", PROCESSING_JOB_COLS),
        &[&id],
    )
}

pub fn list_processing_jobs_for_item(conn: &Connection, item_id: &str) -> Result<Vec<ProcessingJob>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM processing_jobs WHERE item_id = ?1 ORDER BY created_at DESC, id",
            PROCESSING_JOB_COLS
        ),
        &[&item_id],
    )
}

/// Jobs the poller still has to drive to a terminal state.
pub fn list_open_processing_jobs(conn: &Connection, limit: i64) -> Result<Vec<ProcessingJob>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM processing_jobs WHERE status IN ('queued', 'running', 'completed', 'publishing')
             ORDER BY updated_at LIMIT ?1",
            PROCESSING_JOB_COLS
        ),
        &[&limit],
    )
}

pub fn update_processing_job(
    conn: &Connection,
    id: &str,
    status: ProcessingStatus,
    result_ref: Option<&str>,
    external_video_id: Option<&str>,
    error: Option<&str>,
) -> Result<Option<ProcessingJob>> {
    UpdateBuilder::new("processing_jobs", id)
        .with_updated_at()
        .set("status", status.as_ref().to_string())
        .set_opt("result_ref", result_ref.map(String::from))
        .set_opt("external_video_id", external_video_id.map(String::from))
        .set_opt("error", error.map(String::from))
        .execute_returning(conn, PROCESSING_JOB_COLS)
}

/// Move a job into `publishing` only if it is still in the state the caller
/// saw. Returns false when another caller got there first.
pub fn claim_processing_job(
    conn: &Connection,
    id: &str,
    expected: ProcessingStatus,
    expected_updated_at: i64,
    now: i64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE processing_jobs SET status = 'publishing', updated_at = ?1
         WHERE id = ?2 AND status = ?3 AND updated_at = ?4",
        params![now, id, expected.as_ref(), expected_updated_at],
    )?;
    Ok(changed == 1)
}

// ============ Audit Logs ============

#[allow(clippy::too_many_arguments)]
pub fn create_audit_log(
    conn: &Connection,
    enabled: bool,
    actor_type: ActorType,
    actor_id: Option<&str>,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    details: Option<&serde_json::Value>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<AuditLog> {
    let log = AuditLog {
        id: EntityType::AuditLog.gen_id(),
        timestamp: now(),
        actor_type,
        actor_id: actor_id.map(String::from),
        action: action.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        details: details.cloned(),
        ip_address: ip_address.map(String::from),
        user_agent: user_agent.map(String::from),
    };

    // Skip database insert if audit logging is disabled
    if !enabled {
        return Ok(log);
    }

    conn.execute(
        "INSERT INTO audit_logs (id, timestamp, actor_type, actor_id, action, resource_type, resource_id, details, ip_address, user_agent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &log.id,
            log.timestamp,
            actor_type.as_ref(),
            actor_id,
            action,
            resource_type,
            resource_id,
            details.map(|d| d.to_string()),
            ip_address,
            user_agent
        ],
    )?;

    Ok(log)
}

pub fn query_audit_logs(conn: &Connection, query: &AuditLogQuery) -> Result<(Vec<AuditLog>, i64)> {
    let filter = "WHERE (?1 IS NULL OR actor_id = ?1)
                    AND (?2 IS NULL OR action = ?2)
                    AND (?3 IS NULL OR resource_type = ?3)
                    AND (?4 IS NULL OR resource_id = ?4)";
    let total = count(
        conn,
        &format!("SELECT COUNT(*) FROM audit_logs {}", filter),
        &[
            &query.actor_id,
            &query.action,
            &query.resource_type,
            &query.resource_id,
        ],
    )?;
    let logs = query_all(
        conn,
        &format!(
            "SELECT {} FROM audit_logs {} ORDER BY timestamp DESC, id LIMIT ?5 OFFSET ?6",
            AUDIT_LOG_COLS, filter
        ),
        &[
            &query.actor_id,
            &query.action,
            &query.resource_type,
            &query.resource_id,
            &query.limit(),
            &query.offset(),
        ],
    )?;
    Ok((logs, total))
}
