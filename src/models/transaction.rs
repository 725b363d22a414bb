use serde::{Deserialize, Serialize};

use crate::payments::PaymentProvider;

/// Immutable ledger entry. Corrections are posted as reversing entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Idempotency record this entry settles. `None` for reversing entries.
    pub payment_event_ref: Option<String>,
    pub provider: PaymentProvider,
    pub user_id: String,
    pub subject_id: String,
    pub creator_id: Option<String>,
    pub gross_amount: f64,
    pub currency: String,
    pub creator_share_ratio: f64,
    pub platform_share_ratio: f64,
    pub creator_revenue: f64,
    pub platform_revenue: f64,
    pub reverses_transaction_id: Option<String>,
    pub reason: Option<String>,
    pub settled_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShareRatios {
    pub creator: f64,
    pub platform: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RevenuePeriod {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrencyRevenue {
    pub currency: String,
    pub gross_amount: f64,
    pub creator_revenue: f64,
    pub platform_revenue: f64,
    pub transaction_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueSummary {
    pub creator_id: String,
    pub period: RevenuePeriod,
    /// Currency of the totals below. `None` together with them when several
    /// currencies are present; read `by_currency` or filter by currency instead.
    pub currency: Option<String>,
    pub creator_revenue: Option<f64>,
    pub platform_revenue: Option<f64>,
    pub by_currency: Vec<CurrencyRevenue>,
}

/// Row whose stored split does not match what its ratios produce.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerDrift {
    pub transaction_id: String,
    pub stored_creator_revenue: f64,
    pub expected_creator_revenue: f64,
    pub stored_platform_revenue: f64,
    pub expected_platform_revenue: f64,
    pub problem: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub transactions_checked: i64,
    pub drift: Vec<LedgerDrift>,
    /// Applied payment events that should have produced a transaction but did not.
    pub missing_settlements: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty() && self.missing_settlements.is_empty()
    }
}

/// Creator-specific split replacing the platform default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareRatioOverride {
    pub creator_id: String,
    pub creator_share: f64,
    pub updated_at: i64,
}
