use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::EntitlementStatus;
use crate::payments::PaymentProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentKind {
    Subscription,
    OneTimePurchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObservedStatus {
    Succeeded,
    Failed,
}

/// Whether a charge opened a subscription or renewed it. Only renewal
/// failures move a subscription to `past_due`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChargeType {
    #[default]
    Initial,
    Renewal,
}

/// Canonical payment confirmation, independent of the provider that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub provider: PaymentProvider,
    pub provider_transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub currency: String,
    pub kind: PaymentKind,
    pub plan_or_item_id: String,
    pub observed_status: ObservedStatus,
    #[serde(default)]
    pub charge: ChargeType,
    /// Unix seconds as reported by the provider.
    pub provider_timestamp: i64,
}

/// Provider-signalled end of a recurring billing agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationEvent {
    pub provider: PaymentProvider,
    pub provider_event_id: String,
    pub user_id: String,
    pub plan_or_item_id: String,
    pub provider_timestamp: i64,
}

/// Money returned to the payer for an earlier succeeded charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundEvent {
    pub provider: PaymentProvider,
    pub provider_event_id: String,
    /// Provider transaction id of the charge being refunded.
    pub original_transaction_id: String,
    pub user_id: String,
    pub plan_or_item_id: String,
    pub amount: f64,
    pub currency: String,
    pub provider_timestamp: i64,
}

/// An event that goes through admission. Stored verbatim in `payment_events.payload`
/// so the repair job can re-drive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Payment(PaymentEvent),
    Cancellation(CancellationEvent),
    Refund(RefundEvent),
}

impl ProviderEvent {
    pub fn provider(&self) -> PaymentProvider {
        match self {
            ProviderEvent::Payment(e) => e.provider,
            ProviderEvent::Cancellation(e) => e.provider,
            ProviderEvent::Refund(e) => e.provider,
        }
    }

    /// Second half of the idempotency key.
    pub fn provider_event_id(&self) -> &str {
        match self {
            ProviderEvent::Payment(e) => &e.provider_transaction_id,
            ProviderEvent::Cancellation(e) => &e.provider_event_id,
            ProviderEvent::Refund(e) => &e.provider_event_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            ProviderEvent::Payment(e) => &e.user_id,
            ProviderEvent::Cancellation(e) => &e.user_id,
            ProviderEvent::Refund(e) => &e.user_id,
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            ProviderEvent::Payment(e) => &e.plan_or_item_id,
            ProviderEvent::Cancellation(e) => &e.plan_or_item_id,
            ProviderEvent::Refund(e) => &e.plan_or_item_id,
        }
    }

    pub fn event_kind(&self) -> &'static str {
        match self {
            ProviderEvent::Payment(_) => "payment",
            ProviderEvent::Cancellation(_) => "cancellation",
            ProviderEvent::Refund(_) => "refund",
        }
    }
}

/// Output of a provider adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    Event(ProviderEvent),
    /// Recognized delivery with no ledger meaning (e.g. a webhook test ping).
    Ignored { event_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdmissionStatus {
    /// Reserved, effects not yet committed.
    Pending,
    Applied,
    /// Halted by a ledger invariant; needs an operator.
    Failed,
}

/// Recorded result of applying an admitted event, replayed on duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement_status: Option<EntitlementStatus>,
}

/// Row of the idempotency store.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentEventRecord {
    pub id: String,
    pub provider: PaymentProvider,
    pub provider_event_id: String,
    pub event_kind: String,
    #[serde(skip)]
    pub payload: String,
    pub status: AdmissionStatus,
    pub attempts: i64,
    pub lease_expires_at: i64,
    pub outcome: EventOutcome,
    pub last_error: Option<String>,
    pub received_at: i64,
    pub applied_at: Option<i64>,
}

impl PaymentEventRecord {
    pub fn event(&self) -> serde_json::Result<ProviderEvent> {
        serde_json::from_str(&self.payload)
    }
}
