use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntitlementStatus {
    Inactive,
    Active,
    PastDue,
    Canceled,
    /// Monthly plan traded in for a yearly one; the unused days became a credit.
    Upgraded,
}

/// One lifecycle of a user's access to a plan or content item.
///
/// Only one row per (user, subject) has `superseded_at = NULL`; a re-subscription
/// after cancellation supersedes the canceled row and starts a new lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,
    pub user_id: String,
    pub subject_id: String,
    pub status: EntitlementStatus,
    pub activated_at: i64,
    /// `None` for one-time purchases (perpetual access).
    pub expires_at: Option<i64>,
    /// Set while `active` when the user asked to stop at the end of the paid period.
    pub canceled_at: Option<i64>,
    /// Provider timestamp of the newest event applied to this lifecycle.
    pub last_event_at: i64,
    pub version: i64,
    pub superseded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Result of applying one event to the state machine.
#[derive(Debug, Clone)]
pub struct EntitlementDelta {
    pub previous: EntitlementStatus,
    pub current: EntitlementStatus,
    pub entitlement: Option<Entitlement>,
    /// Whether the event should be posted to the ledger.
    pub settle: bool,
}

impl EntitlementDelta {
    pub fn unchanged(entitlement: Option<Entitlement>, settle: bool) -> Self {
        let status = entitlement
            .as_ref()
            .map(|e| e.status)
            .unwrap_or(EntitlementStatus::Inactive);
        Self {
            previous: status,
            current: status,
            entitlement,
            settle,
        }
    }

    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// What entitlement queries return to their caller.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementView {
    pub subject_id: String,
    pub status: EntitlementStatus,
    pub activated_at: Option<i64>,
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<i64>,
}

impl EntitlementView {
    pub fn inactive(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            status: EntitlementStatus::Inactive,
            activated_at: None,
            expires_at: None,
            canceled_at: None,
        }
    }
}

impl From<&Entitlement> for EntitlementView {
    fn from(e: &Entitlement) -> Self {
        Self {
            subject_id: e.subject_id.clone(),
            status: e.status,
            activated_at: Some(e.activated_at),
            expires_at: e.expires_at,
            canceled_at: e.canceled_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelEntitlement {
    /// Keep access until `expires_at` instead of revoking it now.
    #[serde(default = "default_at_period_end")]
    pub at_period_end: bool,
}

fn default_at_period_end() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpgradePlan {
    pub target_plan_id: String,
}

/// Proration applied when a monthly plan is traded in for a yearly one.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeQuote {
    pub upgraded: Entitlement,
    pub target_plan_id: String,
    pub currency: String,
    pub remaining_days: i64,
    pub daily_rate: f64,
    pub credit_amount: f64,
    pub yearly_price: f64,
    /// What the yearly checkout should charge.
    pub final_amount: f64,
    /// Ledger entries moving the credit from the monthly to the yearly plan.
    pub credit_transaction_ids: Vec<String>,
}
