//! Reelpay - payment reconciliation and revenue ledger for a video
//! subscription service.
//!
//! Provider webhooks are normalized into canonical payment events, admitted
//! exactly once, applied to the subscription/purchase state machine and settled
//! into an append-only revenue ledger that creator payouts draw from.

pub mod access;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod entitlements;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod idempotency;
pub mod ledger;
pub mod media;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod payments;
pub mod payouts;
pub mod pipeline;
pub mod rate_limit;
pub mod repair;
pub mod util;
