use axum::{body::Bytes, extract::State, http::HeaderMap};

use super::common::{WebhookProvider, handle_webhook, required_header};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::models::NormalizedEvent;
use crate::payments::{AdapterError, PaymentProvider, verify_hex_signature};
use crate::pipeline::ProcessOutcome;

pub const SIGNATURE_HEADER: &str = "x-signature";

pub struct GlobalWebhookProvider;

impl WebhookProvider for GlobalWebhookProvider {
    fn provider_name(&self) -> &'static str {
        PaymentProvider::Global.as_str()
    }

    fn secret(&self, state: &AppState, _body: &Bytes) -> Option<String> {
        state.webhook_secrets.paypal.clone()
    }

    fn verify_signature(&self, secret: &str, headers: &HeaderMap, body: &Bytes, _now: i64) -> Result<bool> {
        let signature = required_header(headers, SIGNATURE_HEADER)?;
        Ok(verify_hex_signature(secret, body, signature))
    }

    fn normalize(&self, body: &Bytes) -> std::result::Result<NormalizedEvent, AdapterError> {
        PaymentProvider::Global.normalize(body)
    }
}

pub async fn handle_global_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProcessOutcome>> {
    handle_webhook(&GlobalWebhookProvider, &state, headers, body).await
}
