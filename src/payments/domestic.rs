use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{AdapterError, PaymentProvider, RawAmount, RawTimestamp, malformed, require};
use crate::models::{
    CancellationEvent, ChargeType, NormalizedEvent, ObservedStatus, PaymentEvent, PaymentKind,
    ProviderEvent, RefundEvent,
};

type HmacSha256 = Hmac<Sha256>;

pub const DOMESTIC_STATUS_TABLE: &[(&str, ObservedStatus)] = &[
    ("PAID", ObservedStatus::Succeeded),
    ("SUCCESS", ObservedStatus::Succeeded),
    ("COMPLETED", ObservedStatus::Succeeded),
    ("FAILED", ObservedStatus::Failed),
    ("CANCELED", ObservedStatus::Failed),
    ("CANCELLED", ObservedStatus::Failed),
];

/// Maximum age of a signed delivery, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// PortOne-shaped webhook envelope.
#[derive(Debug, Deserialize)]
pub struct DomesticWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    pub data: Option<DomesticEventData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomesticEventData {
    pub payment_id: Option<String>,
    pub transaction_id: Option<String>,
    pub status: Option<String>,
    pub amount: Option<DomesticAmount>,
    pub currency: Option<String>,
    pub customer: Option<DomesticCustomer>,
    pub custom_data: Option<DomesticCustomData>,
    pub billing_key: Option<String>,
    /// Present when the charge was fired by a payment schedule (a renewal).
    pub schedule_id: Option<String>,
    /// Set on `Transaction.Cancelled` and `Transaction.PartialCancelled`.
    pub cancellation_id: Option<String>,
    pub cancelled_amount: Option<RawAmount>,
}

#[derive(Debug, Deserialize)]
pub struct DomesticAmount {
    pub total: Option<RawAmount>,
}

#[derive(Debug, Deserialize)]
pub struct DomesticCustomer {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomesticCustomData {
    pub item_id: Option<String>,
    pub kind: Option<PaymentKind>,
}

pub fn normalize(raw_payload: &[u8]) -> Result<NormalizedEvent, AdapterError> {
    let provider = PaymentProvider::Domestic;
    let event: DomesticWebhookEvent = serde_json::from_slice(raw_payload).map_err(malformed)?;
    let event_type = require(&event.event_type, "type")?.to_string();

    let is_cancellation = event_type == "BillingKey.Deleted";
    let Some(native_status) = event_type.strip_prefix("Transaction.").map(str::to_string) else {
        if !is_cancellation {
            return Ok(NormalizedEvent::Ignored { event_type });
        }
        return normalize_cancellation(&event);
    };
    if matches!(native_status.as_str(), "Cancelled" | "PartialCancelled") {
        return normalize_refund(&event);
    }

    let data = event
        .data
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing data".into()))?;
    let timestamp = event
        .timestamp
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing timestamp".into()))?
        .parse("timestamp")?;

    // The explicit status wins; the type suffix (Paid, Failed, ...) is the fallback.
    let observed_status = match data.status.as_deref() {
        Some(status) => provider.map_status(status)?,
        None => provider.map_status(&native_status)?,
    };

    let payment_id = require(&data.payment_id, "data.paymentId")?;
    let transaction_id = data
        .transaction_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(payment_id)
        .to_string();

    let customer_id = data
        .customer
        .as_ref()
        .and_then(|c| c.id.as_ref())
        .ok_or_else(|| AdapterError::MalformedPayload("missing data.customer.id".into()))?;
    let custom = data
        .custom_data
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing data.customData".into()))?;
    let item_id = require(&custom.item_id, "data.customData.itemId")?;

    let amount = data
        .amount
        .as_ref()
        .and_then(|a| a.total.as_ref())
        .ok_or_else(|| AdapterError::MalformedPayload("missing data.amount.total".into()))?
        .parse("data.amount.total")?;
    let currency = provider.checked_currency(data.currency.as_deref().unwrap_or("KRW"))?;

    let charge = if data.schedule_id.is_some() {
        ChargeType::Renewal
    } else {
        ChargeType::Initial
    };
    let kind = custom.kind.unwrap_or(
        if data.billing_key.is_some() || charge == ChargeType::Renewal {
            PaymentKind::Subscription
        } else {
            PaymentKind::OneTimePurchase
        },
    );

    Ok(NormalizedEvent::Event(ProviderEvent::Payment(PaymentEvent {
        provider,
        provider_transaction_id: transaction_id,
        user_id: customer_id.trim().to_string(),
        amount,
        currency,
        kind,
        plan_or_item_id: item_id.to_string(),
        observed_status,
        charge,
        provider_timestamp: timestamp,
    })))
}

fn normalize_cancellation(event: &DomesticWebhookEvent) -> Result<NormalizedEvent, AdapterError> {
    let data = event
        .data
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing data".into()))?;
    let billing_key = require(&data.billing_key, "data.billingKey")?;
    let timestamp = event
        .timestamp
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing timestamp".into()))?
        .parse("timestamp")?;
    let customer_id = data
        .customer
        .as_ref()
        .and_then(|c| c.id.as_ref())
        .ok_or_else(|| AdapterError::MalformedPayload("missing data.customer.id".into()))?;
    let item_id = data
        .custom_data
        .as_ref()
        .and_then(|c| c.item_id.as_ref())
        .ok_or_else(|| AdapterError::MalformedPayload("missing data.customData.itemId".into()))?;

    Ok(NormalizedEvent::Event(ProviderEvent::Cancellation(
        CancellationEvent {
            provider: PaymentProvider::Domestic,
            // A billing key is deleted once, so key plus time identifies the delivery.
            provider_event_id: format!("billing-key-deleted:{}:{}", billing_key, timestamp),
            user_id: customer_id.trim().to_string(),
            plan_or_item_id: item_id.trim().to_string(),
            provider_timestamp: timestamp,
        },
    )))
}

/// A cancelled transaction is money going back to the payer.
fn normalize_refund(event: &DomesticWebhookEvent) -> Result<NormalizedEvent, AdapterError> {
    let provider = PaymentProvider::Domestic;
    let data = event
        .data
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing data".into()))?;
    let timestamp = event
        .timestamp
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing timestamp".into()))?
        .parse("timestamp")?;

    let payment_id = require(&data.payment_id, "data.paymentId")?;
    let original = data
        .transaction_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(payment_id)
        .to_string();
    // Keyed apart from the charge so it is never deduplicated against it.
    let provider_event_id = match data.cancellation_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => format!("cancel:{}", id),
        _ => format!("cancel:{}:{}", original, timestamp),
    };

    let customer_id = data
        .customer
        .as_ref()
        .and_then(|c| c.id.as_ref())
        .ok_or_else(|| AdapterError::MalformedPayload("missing data.customer.id".into()))?;
    let item_id = data
        .custom_data
        .as_ref()
        .and_then(|c| c.item_id.as_ref())
        .ok_or_else(|| AdapterError::MalformedPayload("missing data.customData.itemId".into()))?;

    let amount = match data.cancelled_amount.as_ref() {
        Some(cancelled) => cancelled.parse("data.cancelledAmount")?,
        None => data
            .amount
            .as_ref()
            .and_then(|a| a.total.as_ref())
            .ok_or_else(|| AdapterError::MalformedPayload("missing data.cancelledAmount".into()))?
            .parse("data.amount.total")?,
    };
    let currency = provider.checked_currency(data.currency.as_deref().unwrap_or("KRW"))?;

    Ok(NormalizedEvent::Event(ProviderEvent::Refund(RefundEvent {
        provider,
        provider_event_id,
        original_transaction_id: original,
        user_id: customer_id.trim().to_string(),
        plan_or_item_id: item_id.trim().to_string(),
        amount,
        currency,
        provider_timestamp: timestamp,
    })))
}

/// Verifies a Standard Webhooks signature as sent by PortOne.
///
/// The signed content is `{webhook-id}.{webhook-timestamp}.{body}`; the header holds
/// one or more space-separated `v1,<base64>` entries. A `whsec_` prefix on the secret
/// is stripped and the remainder is used as the raw key.
pub fn verify_standard_signature(
    secret: &str,
    message_id: &str,
    timestamp: &str,
    payload: &[u8],
    signature_header: &str,
    now: i64,
) -> bool {
    let Ok(sent_at) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    if (now - sent_at).abs() > SIGNATURE_TOLERANCE_SECS {
        return false;
    }

    let key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        return false;
    };
    mac.update(message_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.trim().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = STANDARD.encode(mac.finalize().into_bytes());
    let expected_bytes = expected.as_bytes();

    signature_header
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix("v1,"))
        .any(|candidate| {
            let candidate = candidate.as_bytes();
            candidate.len() == expected_bytes.len() && bool::from(candidate.ct_eq(expected_bytes))
        })
}
