//! Provider adapters: turn provider-native webhook payloads into canonical events.
//!
//! Each provider is a tagged case with its own currency set, status table and
//! payload shape. Adapters are pure; signature checks happen at the HTTP boundary.

pub mod domestic;
pub mod global;
pub mod unified;

pub use domestic::{DOMESTIC_STATUS_TABLE, verify_standard_signature};
pub use global::{GLOBAL_STATUS_TABLE, verify_hex_signature};
pub use unified::{PaymentConfirmation, confirmation_provider, normalize_confirmation};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;
use crate::models::{NormalizedEvent, ObservedStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentProvider {
    /// PayPal, used outside Korea.
    #[serde(rename = "paypal")]
    Global,
    /// PortOne, Korean domestic cards and easy-pay.
    #[serde(rename = "portone")]
    Domestic,
}

const GLOBAL_CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "JPY", "CAD", "AUD"];
const DOMESTIC_CURRENCIES: &[&str] = &["KRW"];

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Global => "paypal",
            PaymentProvider::Domestic => "portone",
        }
    }

    pub fn currencies(&self) -> &'static [&'static str] {
        match self {
            PaymentProvider::Global => GLOBAL_CURRENCIES,
            PaymentProvider::Domestic => DOMESTIC_CURRENCIES,
        }
    }

    pub fn supports_currency(&self, currency: &str) -> bool {
        self.currencies()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(currency))
    }

    /// Provider a user from `country` is expected to pay with.
    pub fn for_country(country: &str) -> Self {
        if country.trim().eq_ignore_ascii_case("KR") {
            PaymentProvider::Domestic
        } else {
            PaymentProvider::Global
        }
    }

    /// Status strings this provider documents, and what they mean.
    pub fn status_table(&self) -> &'static [(&'static str, ObservedStatus)] {
        match self {
            PaymentProvider::Global => GLOBAL_STATUS_TABLE,
            PaymentProvider::Domestic => DOMESTIC_STATUS_TABLE,
        }
    }

    /// Maps a native status through this provider's table. Anything not listed
    /// is ambiguous and never defaults to success or failure.
    pub fn map_status(&self, raw: &str) -> Result<ObservedStatus, AdapterError> {
        let wanted = raw.trim();
        self.status_table()
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, status)| *status)
            .ok_or_else(|| AdapterError::AmbiguousStatus {
                provider: *self,
                status: raw.to_string(),
            })
    }

    pub fn normalize(&self, raw_payload: &[u8]) -> Result<NormalizedEvent, AdapterError> {
        match self {
            PaymentProvider::Global => global::normalize(raw_payload),
            PaymentProvider::Domestic => domestic::normalize(raw_payload),
        }
    }

    /// Checks the currency against this provider's set and returns it upper-cased.
    fn checked_currency(&self, currency: &str) -> Result<String, AdapterError> {
        let currency = currency.trim();
        if currency.is_empty() {
            return Err(AdapterError::MalformedPayload("missing currency".into()));
        }
        if !self.supports_currency(currency) {
            return Err(AdapterError::UnsupportedCurrency {
                provider: *self,
                currency: currency.to_string(),
            });
        }
        Ok(currency.to_ascii_uppercase())
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paypal" | "global" => Ok(PaymentProvider::Global),
            "portone" | "domestic" => Ok(PaymentProvider::Domestic),
            other => Err(AdapterError::MalformedPayload(format!(
                "unknown payment provider: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AdapterError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("currency {currency} is not supported by {provider}")]
    UnsupportedCurrency {
        provider: PaymentProvider,
        currency: String,
    },

    #[error("{provider} status {status:?} maps to neither success nor failure")]
    AmbiguousStatus {
        provider: PaymentProvider,
        status: String,
    },
}

impl From<AdapterError> for AppError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::MalformedPayload(_) => AppError::BadRequest(err.to_string()),
            AdapterError::UnsupportedCurrency { .. } | AdapterError::AmbiguousStatus { .. } => {
                AppError::Unprocessable(err.to_string())
            }
        }
    }
}

fn malformed(e: serde_json::Error) -> AdapterError {
    AdapterError::MalformedPayload(e.to_string())
}

fn require<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, AdapterError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AdapterError::MalformedPayload(format!("missing {}", field)))
}

/// Amounts arrive as JSON numbers or decimal strings depending on the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    fn parse(&self, field: &str) -> Result<f64, AdapterError> {
        let value = match self {
            RawAmount::Number(n) => *n,
            RawAmount::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                AdapterError::MalformedPayload(format!("{} is not a number: {:?}", field, s))
            })?,
        };
        if !value.is_finite() || value < 0.0 {
            return Err(AdapterError::MalformedPayload(format!(
                "{} must be a non-negative amount",
                field
            )));
        }
        Ok(value)
    }
}

/// Timestamps arrive as RFC 3339 strings or unix seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Unix(i64),
    Text(String),
}

impl RawTimestamp {
    fn parse(&self, field: &str) -> Result<i64, AdapterError> {
        match self {
            RawTimestamp::Unix(secs) => Ok(*secs),
            RawTimestamp::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.timestamp())
                .or_else(|_| s.trim().parse::<i64>())
                .map_err(|_| {
                    AdapterError::MalformedPayload(format!("{} is not a timestamp: {:?}", field, s))
                }),
        }
    }
}
