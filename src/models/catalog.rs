use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result, msg};
use crate::util::normalize_currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CatalogKind {
    /// Recurring subscription plan. Platform-only revenue.
    Plan,
    Course,
    Routine,
    Drill,
    Lesson,
    /// One-time purchase that grants the items it includes.
    Bundle,
}

impl CatalogKind {
    pub fn is_plan(&self) -> bool {
        matches!(self, CatalogKind::Plan)
    }

    /// Kinds whose entitlement grants the items they include.
    pub fn can_include(&self) -> bool {
        matches!(self, CatalogKind::Plan | CatalogKind::Bundle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    /// Advances `from` by one billing period, clamping to the end of shorter months.
    pub fn advance(&self, from: i64) -> i64 {
        let months = match self {
            BillingInterval::Month => Months::new(1),
            BillingInterval::Year => Months::new(12),
        };
        DateTime::<Utc>::from_timestamp(from, 0)
            .and_then(|dt| dt.checked_add_months(months))
            .map(|dt| dt.timestamp())
            .unwrap_or(from + 30 * 86400)
    }
}

/// A plan, piece of content, or bundle a user can be entitled to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub kind: CatalogKind,
    pub title: String,
    /// Owning creator. `None` for platform-only items such as plans.
    pub creator_id: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub billing_interval: Option<BillingInterval>,
    pub video_url: Option<String>,
    pub external_video_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCatalogItem {
    pub kind: CatalogKind,
    pub title: String,
    pub creator_id: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub billing_interval: Option<BillingInterval>,
    pub video_url: Option<String>,
}

fn validate_price(price: Option<f64>, currency: Option<&str>) -> Result<()> {
    if let Some(price) = price {
        if !price.is_finite() || price < 0.0 {
            return Err(AppError::BadRequest("price must be a non-negative number".into()));
        }
    }
    if let Some(currency) = currency {
        normalize_currency(currency).ok_or_else(|| AppError::BadRequest(msg::INVALID_CURRENCY.into()))?;
    }
    Ok(())
}

impl CreateCatalogItem {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::BadRequest("title must not be empty".into()));
        }
        validate_price(self.price, self.currency.as_deref())?;
        if self.price.is_some() != self.currency.is_some() {
            return Err(AppError::BadRequest("price and currency go together".into()));
        }
        match (self.kind.is_plan(), self.billing_interval.is_some()) {
            (true, false) => Err(AppError::BadRequest("plans need a billing_interval".into())),
            (false, true) => Err(AppError::BadRequest("only plans have a billing_interval".into())),
            _ if self.kind.is_plan() && self.creator_id.is_some() => {
                Err(AppError::BadRequest("plans are platform-owned and take no creator_id".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Edge saying that an entitlement to `parent_id` grants `child_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogInclusion {
    pub parent_id: String,
    pub child_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCatalogItem {
    pub title: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub video_url: Option<String>,
}

impl UpdateCatalogItem {
    pub fn validate(&self) -> Result<()> {
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(AppError::BadRequest("title must not be empty".into()));
        }
        validate_price(self.price, self.currency.as_deref())
    }
}
