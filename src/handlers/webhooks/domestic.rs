use axum::{body::Bytes, extract::State, http::HeaderMap};

use super::common::{WebhookProvider, handle_webhook, required_header};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::models::NormalizedEvent;
use crate::payments::{AdapterError, PaymentProvider, verify_standard_signature};
use crate::pipeline::ProcessOutcome;

pub const ID_HEADER: &str = "webhook-id";
pub const TIMESTAMP_HEADER: &str = "webhook-timestamp";
pub const SIGNATURE_HEADER: &str = "webhook-signature";

/// PortOne delivers Standard Webhooks: id, timestamp and signature travel in
/// separate headers.
pub struct DomesticWebhookProvider;

impl WebhookProvider for DomesticWebhookProvider {
    fn provider_name(&self) -> &'static str {
        PaymentProvider::Domestic.as_str()
    }

    fn secret(&self, state: &AppState, _body: &Bytes) -> Option<String> {
        state.webhook_secrets.portone.clone()
    }

    fn verify_signature(&self, secret: &str, headers: &HeaderMap, body: &Bytes, now: i64) -> Result<bool> {
        let message_id = required_header(headers, ID_HEADER)?;
        let timestamp = required_header(headers, TIMESTAMP_HEADER)?;
        let signature = required_header(headers, SIGNATURE_HEADER)?;
        Ok(verify_standard_signature(secret, message_id, timestamp, body, signature, now))
    }

    fn normalize(&self, body: &Bytes) -> std::result::Result<NormalizedEvent, AdapterError> {
        PaymentProvider::Domestic.normalize(body)
    }
}

pub async fn handle_domestic_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProcessOutcome>> {
    handle_webhook(&DomesticWebhookProvider, &state, headers, body).await
}
