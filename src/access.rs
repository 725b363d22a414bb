//! Decides whether a user may watch a catalog item.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::Result;
use crate::models::{CatalogItem, User};

/// Why access was refused. Internal only: callers present every denial the
/// same way so a denial does not reveal whether the subject exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    UnknownSubject,
    NotEntitled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed { video_url: Option<String> },
    #[serde(skip)]
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed { .. })
    }
}

/// Admins and the owning creator always pass. Everyone else needs an active,
/// unexpired entitlement to the subject or to a bundle or plan including it.
pub fn can_view(conn: &Connection, viewer: &User, subject_id: &str, now: i64) -> Result<AccessDecision> {
    let Some(item) = queries::get_catalog_item(conn, subject_id)? else {
        return Ok(AccessDecision::Denied(DenyReason::UnknownSubject));
    };

    if viewer.is_admin() || owns(viewer, &item) {
        return Ok(allowed(item));
    }

    let subjects = queries::subsuming_subject_ids(conn, &item.id)?;
    if queries::has_active_entitlement(conn, &viewer.id, &subjects, now)? {
        return Ok(allowed(item));
    }

    tracing::debug!("Access to {} denied for {}", subject_id, viewer.id);
    Ok(AccessDecision::Denied(DenyReason::NotEntitled))
}

fn owns(viewer: &User, item: &CatalogItem) -> bool {
    item.creator_id.as_deref() == Some(viewer.id.as_str())
}

fn allowed(item: CatalogItem) -> AccessDecision {
    AccessDecision::Allowed {
        video_url: item.video_url,
    }
}
