//! Shared helpers for handlers: request metadata, secrets, audit logging, money.

use axum::http::HeaderMap;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::db::queries;
use crate::error::Result;
use crate::models::{ActorType, AuditAction, AuditLog};

/// Tolerance used when comparing monetary amounts stored as floating point.
pub const MONEY_EPSILON: f64 = 1e-9;

/// Hash a bearer secret for storage. Keys are high-entropy, so a salted
/// SHA-256 is enough for lookup without storing the plaintext.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"reelpay-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// `a <= b` within [`MONEY_EPSILON`].
pub fn money_le(a: f64, b: f64) -> bool {
    a <= b + MONEY_EPSILON
}

pub fn money_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= MONEY_EPSILON
}

/// Round `amount` down to the smallest unit `currency` is charged in.
pub fn floor_to_minor_unit(amount: f64, currency: &str) -> f64 {
    let zero_decimal = ["KRW", "JPY"].iter().any(|c| c.eq_ignore_ascii_case(currency));
    if zero_decimal {
        amount.floor()
    } else {
        // Nudge past representation error so 12.30 does not floor to 12.29.
        ((amount * 100.0) + 1e-6).floor() / 100.0
    }
}

/// Uppercase and validate an ISO-4217-shaped currency code.
pub fn normalize_currency(code: &str) -> Option<String> {
    let code = code.trim();
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| code.to_ascii_uppercase())
}

/// Retry delays in milliseconds for calls to external collaborators.
pub const RETRY_DELAYS_MS: &[u64] = &[200, 800, 2000];

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// delays in `delays_ms` are used up. The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    label: &str,
    delays_ms: &[u64],
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!("{} succeeded after {} retries", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if is_transient(&e) && attempt < delays_ms.len() => {
                tracing::debug!("{} failed (attempt {}): {}", label, attempt + 1, e);
                tokio::time::sleep(std::time::Duration::from_millis(delays_ms[attempt])).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!("{} failed after {} attempts: {}", label, attempt + 1, e);
                return Err(e);
            }
        }
    }
}

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Builder for creating audit log entries.
///
/// # Example
/// ```ignore
/// AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
///     .actor(ActorType::Admin, Some(&principal.user.id))
///     .action(AuditAction::ReverseTransaction)
///     .resource("transaction", &txn.id)
///     .details(&serde_json::json!({ "reason": reason }))
///     .save()?;
/// ```
pub struct AuditLogBuilder<'a> {
    conn: &'a Connection,
    enabled: bool,
    headers: Option<&'a HeaderMap>,
    actor_type: ActorType,
    actor_id: Option<&'a str>,
    action: AuditAction,
    resource_type: &'a str,
    resource_id: &'a str,
    details: Option<&'a serde_json::Value>,
}

impl<'a> AuditLogBuilder<'a> {
    pub fn new(conn: &'a Connection, enabled: bool, headers: &'a HeaderMap) -> Self {
        Self {
            headers: Some(headers),
            ..Self::system(conn, enabled)
        }
    }

    /// Entry written by a background task or the CLI, with no request attached.
    pub fn system(conn: &'a Connection, enabled: bool) -> Self {
        Self {
            conn,
            enabled,
            headers: None,
            actor_type: ActorType::System,
            actor_id: None,
            action: AuditAction::CreateUser, // Placeholder, should always be set
            resource_type: "",
            resource_id: "",
            details: None,
        }
    }

    pub fn actor(mut self, actor_type: ActorType, actor_id: Option<&'a str>) -> Self {
        self.actor_type = actor_type;
        self.actor_id = actor_id;
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = action;
        self
    }

    pub fn resource(mut self, resource_type: &'a str, resource_id: &'a str) -> Self {
        self.resource_type = resource_type;
        self.resource_id = resource_id;
        self
    }

    pub fn details(mut self, details: &'a serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn save(self) -> Result<AuditLog> {
        let (ip, ua) = self
            .headers
            .map(extract_request_info)
            .unwrap_or((None, None));
        queries::create_audit_log(
            self.conn,
            self.enabled,
            self.actor_type,
            self.actor_id,
            self.action.as_ref(),
            self.resource_type,
            self.resource_id,
            self.details,
            ip.as_deref(),
            ua.as_deref(),
        )
    }
}
