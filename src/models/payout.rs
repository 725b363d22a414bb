use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::payments::PaymentProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Paid,
    Rejected,
}

impl PayoutStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Paid | PayoutStatus::Rejected)
    }

    pub fn can_transition_to(&self, next: PayoutStatus) -> bool {
        matches!(
            (self, next),
            (PayoutStatus::Pending, PayoutStatus::Processing)
                | (PayoutStatus::Processing, PayoutStatus::Paid)
                | (PayoutStatus::Pending, PayoutStatus::Rejected)
                | (PayoutStatus::Processing, PayoutStatus::Rejected)
        )
    }
}

/// Payout rails. Serialized the way creators type them in the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
pub enum PayoutMethod {
    #[serde(rename = "PayPal", alias = "paypal")]
    #[strum(to_string = "PayPal", serialize = "paypal")]
    PayPal,
    #[serde(rename = "Portone", alias = "portone", alias = "PortOne")]
    #[strum(to_string = "Portone", serialize = "portone", serialize = "PortOne")]
    Portone,
}

impl PayoutMethod {
    pub fn provider(&self) -> PaymentProvider {
        match self {
            PayoutMethod::PayPal => PaymentProvider::Global,
            PayoutMethod::Portone => PaymentProvider::Domestic,
        }
    }

    pub fn supports_currency(&self, currency: &str) -> bool {
        self.provider().supports_currency(currency)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: String,
    pub creator_id: String,
    pub payment_method: PayoutMethod,
    pub amount: f64,
    pub currency: String,
    /// PayPal e-mail or PortOne phone number the money goes to.
    pub destination: String,
    pub status: PayoutStatus,
    pub rejection_reason: Option<String>,
    pub requested_at: i64,
    pub resolved_at: Option<i64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePayout {
    pub amount: f64,
    pub currency: String,
    pub payment_method: PayoutMethod,
    pub paypal_email: Option<String>,
    pub portone_phone: Option<String>,
}

impl CreatePayout {
    pub fn destination(&self) -> Option<&str> {
        let dest = match self.payment_method {
            PayoutMethod::PayPal => self.paypal_email.as_deref(),
            PayoutMethod::Portone => self.portone_phone.as_deref(),
        };
        dest.map(str::trim).filter(|d| !d.is_empty())
    }
}

/// Operator decision for a payout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PayoutOutcome {
    Processing,
    Paid,
    Rejected { reason: Option<String> },
}

impl PayoutOutcome {
    pub fn target_status(&self) -> PayoutStatus {
        match self {
            PayoutOutcome::Processing => PayoutStatus::Processing,
            PayoutOutcome::Paid => PayoutStatus::Paid,
            PayoutOutcome::Rejected { .. } => PayoutStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutBalance {
    pub creator_id: String,
    pub currency: String,
    /// Creator revenue accrued in the ledger.
    pub accrued: f64,
    /// Sum of pending, processing and paid payouts.
    pub reserved: f64,
    pub available: f64,
}
