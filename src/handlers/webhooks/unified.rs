use axum::{body::Bytes, extract::State, http::HeaderMap};

use super::common::{WebhookProvider, handle_webhook, required_header};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::models::NormalizedEvent;
use crate::payments::{
    AdapterError, PaymentProvider, confirmation_provider, normalize_confirmation, verify_hex_signature,
};
use crate::pipeline::ProcessOutcome;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Flat confirmation posted after either provider completes. Signed with the
/// dedicated confirmation secret, or the named provider's secret when that is unset.
pub struct ConfirmationWebhookProvider;

impl WebhookProvider for ConfirmationWebhookProvider {
    fn provider_name(&self) -> &'static str {
        "payment-confirmation"
    }

    fn secret(&self, state: &AppState, body: &Bytes) -> Option<String> {
        let secrets = &state.webhook_secrets;
        if let Some(secret) = &secrets.unified {
            return Some(secret.clone());
        }
        match confirmation_provider(body).ok()? {
            PaymentProvider::Global => secrets.paypal.clone(),
            PaymentProvider::Domestic => secrets.portone.clone(),
        }
    }

    fn verify_signature(&self, secret: &str, headers: &HeaderMap, body: &Bytes, _now: i64) -> Result<bool> {
        let signature = required_header(headers, SIGNATURE_HEADER)?;
        Ok(verify_hex_signature(secret, body, signature))
    }

    fn normalize(&self, body: &Bytes) -> std::result::Result<NormalizedEvent, AdapterError> {
        normalize_confirmation(body)
    }
}

pub async fn handle_payment_confirmation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProcessOutcome>> {
    handle_webhook(&ConfirmationWebhookProvider, &state, headers, body).await
}
