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

pub const GLOBAL_STATUS_TABLE: &[(&str, ObservedStatus)] = &[
    ("COMPLETED", ObservedStatus::Succeeded),
    ("SUCCESS", ObservedStatus::Succeeded),
    ("FAILED", ObservedStatus::Failed),
    ("CANCELED", ObservedStatus::Failed),
    ("CANCELLED", ObservedStatus::Failed),
    ("DENIED", ObservedStatus::Failed),
    ("DECLINED", ObservedStatus::Failed),
];

/// PayPal-shaped webhook envelope.
#[derive(Debug, Deserialize)]
pub struct GlobalWebhookEvent {
    pub id: Option<String>,
    pub event_type: Option<String>,
    pub create_time: Option<RawTimestamp>,
    pub resource: Option<GlobalResource>,
}

#[derive(Debug, Deserialize)]
pub struct GlobalResource {
    pub id: Option<String>,
    pub status: Option<String>,
    pub amount: Option<GlobalAmount>,
    /// Set on subscription sales and subscription resources.
    pub billing_agreement_id: Option<String>,
    /// `"{user_id}:{item_id}"`, attached by the checkout page.
    pub custom_id: Option<String>,
    pub create_time: Option<RawTimestamp>,
    /// Refunded sale, on `PAYMENT.SALE.REFUNDED`.
    pub sale_id: Option<String>,
    pub capture_id: Option<String>,
    #[serde(default)]
    pub links: Vec<GlobalLink>,
}

#[derive(Debug, Deserialize)]
pub struct GlobalLink {
    pub href: String,
    pub rel: String,
}

#[derive(Debug, Deserialize)]
pub struct GlobalAmount {
    pub value: Option<RawAmount>,
    pub currency_code: Option<String>,
}

/// How an event type feeds the ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
enum GlobalEventClass {
    InitialCharge,
    RenewalCharge,
    /// Renewal charge whose failure is carried by the event type itself.
    RenewalFailure,
    /// Money returned for an earlier capture or sale.
    Refund,
    Cancellation,
    Ignored,
}

fn classify(event_type: &str) -> GlobalEventClass {
    match event_type {
        "PAYMENT.CAPTURE.COMPLETED"
        | "PAYMENT.CAPTURE.PENDING"
        | "PAYMENT.CAPTURE.DENIED"
        | "PAYMENT.CAPTURE.DECLINED"
        | "CHECKOUT.ORDER.COMPLETED" => GlobalEventClass::InitialCharge,
        "PAYMENT.SALE.COMPLETED" | "PAYMENT.SALE.PENDING" | "PAYMENT.SALE.DENIED" => {
            GlobalEventClass::RenewalCharge
        }
        "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => GlobalEventClass::RenewalFailure,
        "PAYMENT.CAPTURE.REFUNDED"
        | "PAYMENT.CAPTURE.REVERSED"
        | "PAYMENT.SALE.REFUNDED"
        | "PAYMENT.SALE.REVERSED" => GlobalEventClass::Refund,
        "BILLING.SUBSCRIPTION.CANCELLED" | "BILLING.SUBSCRIPTION.EXPIRED" => {
            GlobalEventClass::Cancellation
        }
        _ => GlobalEventClass::Ignored,
    }
}

/// Provider id of the charge a refund or reversal points back to.
fn refunded_charge_id(resource: &GlobalResource, event_type: &str) -> Result<String, AdapterError> {
    let explicit = [&resource.sale_id, &resource.capture_id]
        .into_iter()
        .find_map(|id| id.as_deref().map(str::trim).filter(|id| !id.is_empty()));
    if let Some(id) = explicit {
        return Ok(id.to_string());
    }
    let up = resource
        .links
        .iter()
        .find(|link| link.rel.eq_ignore_ascii_case("up"))
        .and_then(|link| link.href.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty());
    if let Some(id) = up {
        return Ok(id.to_string());
    }
    // A reversal is delivered on the capture itself.
    if event_type.ends_with(".REVERSED") {
        return Ok(require(&resource.id, "resource.id")?.to_string());
    }
    Err(AdapterError::MalformedPayload(
        "refund does not reference the original charge".into(),
    ))
}

fn split_custom_id(custom_id: &str) -> Result<(String, String), AdapterError> {
    let (user_id, item_id) = custom_id.split_once(':').ok_or_else(|| {
        AdapterError::MalformedPayload("custom_id must be \"user_id:item_id\"".into())
    })?;
    let (user_id, item_id) = (user_id.trim(), item_id.trim());
    if user_id.is_empty() || item_id.is_empty() {
        return Err(AdapterError::MalformedPayload(
            "custom_id must be \"user_id:item_id\"".into(),
        ));
    }
    Ok((user_id.to_string(), item_id.to_string()))
}

pub fn normalize(raw_payload: &[u8]) -> Result<NormalizedEvent, AdapterError> {
    let provider = PaymentProvider::Global;
    let event: GlobalWebhookEvent = serde_json::from_slice(raw_payload).map_err(malformed)?;
    let event_type = require(&event.event_type, "event_type")?.to_string();

    let class = classify(&event_type);
    if class == GlobalEventClass::Ignored {
        return Ok(NormalizedEvent::Ignored { event_type });
    }

    let resource = event
        .resource
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing resource".into()))?;
    let (user_id, item_id) = split_custom_id(require(&resource.custom_id, "resource.custom_id")?)?;
    let timestamp = event
        .create_time
        .as_ref()
        .or(resource.create_time.as_ref())
        .ok_or_else(|| AdapterError::MalformedPayload("missing create_time".into()))?
        .parse("create_time")?;

    if class == GlobalEventClass::Cancellation {
        let event_id = require(&event.id, "id")?;
        return Ok(NormalizedEvent::Event(ProviderEvent::Cancellation(
            CancellationEvent {
                provider,
                provider_event_id: event_id.to_string(),
                user_id,
                plan_or_item_id: item_id,
                provider_timestamp: timestamp,
            },
        )));
    }

    let amount = resource
        .amount
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing resource.amount".into()))?;
    let value = amount
        .value
        .as_ref()
        .ok_or_else(|| AdapterError::MalformedPayload("missing amount.value".into()))?
        .parse("amount.value")?;
    let currency = provider.checked_currency(require(&amount.currency_code, "currency_code")?)?;

    if class == GlobalEventClass::Refund {
        let event_id = require(&event.id, "id")?;
        return Ok(NormalizedEvent::Event(ProviderEvent::Refund(RefundEvent {
            provider,
            provider_event_id: event_id.to_string(),
            original_transaction_id: refunded_charge_id(resource, &event_type)?,
            user_id,
            plan_or_item_id: item_id,
            amount: value,
            currency,
            provider_timestamp: timestamp,
        })));
    }

    let transaction_id = require(&resource.id, "resource.id")?.to_string();
    let observed_status = match class {
        GlobalEventClass::RenewalFailure => ObservedStatus::Failed,
        _ => provider.map_status(require(&resource.status, "resource.status")?)?,
    };

    let charge = match class {
        GlobalEventClass::RenewalCharge | GlobalEventClass::RenewalFailure => ChargeType::Renewal,
        _ => ChargeType::Initial,
    };
    let kind = if charge == ChargeType::Renewal || resource.billing_agreement_id.is_some() {
        PaymentKind::Subscription
    } else {
        PaymentKind::OneTimePurchase
    };

    Ok(NormalizedEvent::Event(ProviderEvent::Payment(PaymentEvent {
        provider,
        provider_transaction_id: transaction_id,
        user_id,
        amount: value,
        currency,
        kind,
        plan_or_item_id: item_id,
        observed_status,
        charge,
        provider_timestamp: timestamp,
    })))
}

/// Verifies a hex-encoded HMAC-SHA256 of the raw body.
pub fn verify_hex_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    let expected_bytes = expected.as_bytes();
    let provided = signature.trim().to_ascii_lowercase();
    let provided_bytes = provided.as_bytes();

    // Length is not secret (always 64 hex chars for SHA-256)
    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}
