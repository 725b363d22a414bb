//! Shared webhook ingress for the payment providers.
//!
//! Each provider supplies signature extraction/verification and payload
//! normalization; everything after that (admission, state machine, settlement)
//! goes through the same pipeline regardless of where the event came from.

use axum::{body::Bytes, http::HeaderMap};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::Json;
use crate::models::NormalizedEvent;
use crate::payments::AdapterError;
use crate::pipeline::{self, ProcessOutcome};

/// Provider-specific pieces of webhook handling.
pub trait WebhookProvider: Send + Sync {
    /// Provider name for logging (e.g. "paypal", "portone").
    fn provider_name(&self) -> &'static str;

    /// Shared secret for this endpoint. May depend on the payload when one
    /// endpoint serves several providers.
    fn secret(&self, state: &AppState, body: &Bytes) -> Option<String>;

    /// Check the request signature. A missing signature header is an error,
    /// a present but wrong one is `Ok(false)`.
    fn verify_signature(&self, secret: &str, headers: &HeaderMap, body: &Bytes, now: i64) -> Result<bool>;

    /// Parse the payload into a canonical event.
    fn normalize(&self, body: &Bytes) -> std::result::Result<NormalizedEvent, AdapterError>;
}

/// Read a header as a string; absent or non-ASCII headers are a 400.
pub fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| AppError::BadRequest(format!("{}: {}", msg::MISSING_SIGNATURE, name)))?
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("Invalid {} header", name)))
}

pub async fn handle_webhook<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProcessOutcome>> {
    let now = queries::now();

    match provider.secret(state, &body) {
        Some(secret) => {
            if !provider.verify_signature(&secret, &headers, &body, now)? {
                tracing::warn!("Rejected {} webhook: signature mismatch", provider.provider_name());
                return Err(AppError::Unauthorized);
            }
        }
        None if state.dev_mode => {
            tracing::warn!(
                "No {} webhook secret configured, skipping signature check (dev mode)",
                provider.provider_name()
            );
        }
        None => {
            tracing::error!("{} webhook received but no secret is configured", provider.provider_name());
            return Err(AppError::Unauthorized);
        }
    }

    let event = provider.normalize(&body).inspect_err(|e| {
        tracing::warn!("Rejected {} webhook: {}", provider.provider_name(), e);
    })?;

    let mut conn = state.db.get()?;
    let outcome = pipeline::process_normalized(&mut conn, event, &state.ledger, now)?;

    Ok(Json(outcome))
}
