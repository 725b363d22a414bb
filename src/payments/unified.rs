use serde::Deserialize;

use super::{AdapterError, PaymentProvider, RawAmount, RawTimestamp, malformed, require};
use crate::models::{ChargeType, NormalizedEvent, PaymentEvent, PaymentKind, ProviderEvent};

/// Flat confirmation body posted by the checkout front-end after either provider
/// completes, e.g. `{"transaction_id", "status": "SUCCESS", "payment_method": "Portone", ...}`.
#[derive(Debug, Deserialize)]
pub struct PaymentConfirmation {
    pub transaction_id: Option<String>,
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub subscription_plan: Option<String>,
    pub item_id: Option<String>,
    pub payment_method: Option<String>,
    pub amount: Option<RawAmount>,
    pub currency: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub charge: ChargeType,
}

impl PaymentConfirmation {
    pub fn provider(&self) -> Result<PaymentProvider, AdapterError> {
        require(&self.payment_method, "payment_method")?.parse()
    }
}

/// Peeks at `payment_method` so the caller can pick the right secret before normalizing.
pub fn confirmation_provider(raw_payload: &[u8]) -> Result<PaymentProvider, AdapterError> {
    let confirmation: PaymentConfirmation =
        serde_json::from_slice(raw_payload).map_err(malformed)?;
    confirmation.provider()
}

pub fn normalize_confirmation(raw_payload: &[u8]) -> Result<NormalizedEvent, AdapterError> {
    let confirmation: PaymentConfirmation =
        serde_json::from_slice(raw_payload).map_err(malformed)?;
    let provider = confirmation.provider()?;

    let (kind, subject) = match (&confirmation.subscription_plan, &confirmation.item_id) {
        (Some(plan), None) => (PaymentKind::Subscription, plan),
        (None, Some(item)) => (PaymentKind::OneTimePurchase, item),
        (Some(_), Some(_)) => {
            return Err(AdapterError::MalformedPayload(
                "subscription_plan and item_id are mutually exclusive".into(),
            ));
        }
        (None, None) => {
            return Err(AdapterError::MalformedPayload(
                "missing subscription_plan or item_id".into(),
            ));
        }
    };
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(AdapterError::MalformedPayload("empty plan or item id".into()));
    }

    let observed_status = provider.map_status(require(&confirmation.status, "status")?)?;
    let amount = confirmation
        .amount
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing amount".into()))?
        .parse("amount")?;
    let currency = provider.checked_currency(require(&confirmation.currency, "currency")?)?;
    let timestamp = confirmation
        .timestamp
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing timestamp".into()))?
        .parse("timestamp")?;

    Ok(NormalizedEvent::Event(ProviderEvent::Payment(PaymentEvent {
        provider,
        provider_transaction_id: require(&confirmation.transaction_id, "transaction_id")?
            .to_string(),
        user_id: require(&confirmation.user_id, "user_id")?.to_string(),
        amount,
        currency,
        kind,
        plan_or_item_id: subject.to_string(),
        observed_status,
        charge: confirmation.charge,
        provider_timestamp: timestamp,
    })))
}
