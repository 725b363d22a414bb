//! Prefixed ID generation for ledger entities.
//!
//! All IDs use an `rp_` brand prefix so they never collide with provider
//! identifiers (PayPal capture ids, PortOne payment ids, billing keys).
//!
//! Format: `rp_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

const ALL_PREFIXES: &[&str] = &[
    "rp_usr_", "rp_key_", "rp_item_", "rp_evt_", "rp_txn_", "rp_ent_", "rp_pay_", "rp_job_",
    "rp_aud_",
];

/// Validate that a string is a well-formed prefixed ID.
///
/// Cheap check to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    User,
    ApiKey,
    CatalogItem,
    PaymentEvent,
    Transaction,
    Entitlement,
    Payout,
    ProcessingJob,
    AuditLog,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "rp_usr",
            Self::ApiKey => "rp_key",
            Self::CatalogItem => "rp_item",
            Self::PaymentEvent => "rp_evt",
            Self::Transaction => "rp_txn",
            Self::Entitlement => "rp_ent",
            Self::Payout => "rp_pay",
            Self::ProcessingJob => "rp_job",
            Self::AuditLog => "rp_aud",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
