use axum::extract::{Extension, State};

use crate::access::{self, AccessDecision};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::Principal;

/// `GET /access/{subject_id}`. Every denial is the same 403, whether the
/// subject is missing, unpaid for, or owned by someone else.
pub async fn check_access(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(subject_id): Path<String>,
) -> Result<Json<AccessDecision>> {
    let conn = state.db.get()?;
    match access::can_view(&conn, &principal.user, &subject_id, queries::now())? {
        decision @ AccessDecision::Allowed { .. } => Ok(Json(decision)),
        AccessDecision::Denied(_) => Err(AppError::Forbidden(msg::ACCESS_DENIED.into())),
    }
}
