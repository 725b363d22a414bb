use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::CatalogItem;
use crate::pagination::{Paginated, PaginationQuery};

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    #[serde(flatten)]
    pub pagination: PaginationQuery,
    pub creator_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CatalogItemDetail {
    #[serde(flatten)]
    pub item: CatalogItem,
    /// Items an entitlement to this one also grants.
    pub includes: Vec<CatalogItem>,
}

pub async fn list_catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Paginated<CatalogItem>>> {
    let conn = state.db.get()?;
    let (items, total) = queries::list_catalog_items_paginated(
        &conn,
        query.creator_id.as_deref(),
        query.pagination.limit(),
        query.pagination.offset(),
    )?;
    let items = items.into_iter().map(without_playback_url).collect();
    Ok(Json(Paginated::from_query(items, total, &query.pagination)))
}

pub async fn get_catalog_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<Json<CatalogItemDetail>> {
    let conn = state.db.get()?;
    let item = queries::get_catalog_item(&conn, &item_id)?.or_not_found(msg::ITEM_NOT_FOUND)?;
    let includes = queries::list_included_items(&conn, &item_id)?
        .into_iter()
        .map(without_playback_url)
        .collect();
    Ok(Json(CatalogItemDetail {
        item: without_playback_url(item),
        includes,
    }))
}

/// Playback URLs are only handed out by the access check.
fn without_playback_url(mut item: CatalogItem) -> CatalogItem {
    item.video_url = None;
    item
}
