use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::models::{ActorType, User, UserRole};
use crate::util::extract_bearer_token;

/// Authenticated caller, inserted into request extensions by [`api_key_auth`].
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    /// The API key ID (not the key itself)
    pub key_id: String,
    /// The visible key prefix, for audit logs
    pub key_prefix: String,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.user.is_admin()
    }

    pub fn actor_type(&self) -> ActorType {
        self.user.role.into()
    }

    /// The caller is `user_id` or an admin.
    pub fn can_act_for(&self, user_id: &str) -> bool {
        self.is_admin() || self.user.id == user_id
    }

    /// Like [`can_act_for`](Self::can_act_for), but answers with the same 404
    /// a missing record would produce.
    pub fn require_self_or_admin(&self, user_id: &str, not_found: &str) -> Result<()> {
        if self.can_act_for(user_id) {
            Ok(())
        } else {
            Err(AppError::NotFound(not_found.to_string()))
        }
    }

    /// Creator endpoints: the creator themself (with the creator role) or an admin.
    pub fn require_creator_or_admin(&self, creator_id: &str) -> Result<()> {
        let own = self.user.id == creator_id && self.user.role == UserRole::Creator;
        if self.is_admin() || own {
            Ok(())
        } else {
            Err(AppError::NotFound(msg::USER_NOT_FOUND.into()))
        }
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal> {
    let token = extract_bearer_token(headers).ok_or(AppError::Unauthorized)?;
    let conn = state.db.get()?;

    let (user, key) = queries::get_user_by_api_key(&conn, token)?.ok_or(AppError::Unauthorized)?;

    Ok(Principal {
        user,
        key_id: key.id,
        key_prefix: key.prefix,
    })
}

pub async fn api_key_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let principal = authenticate(&state, request.headers())?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let principal = authenticate(&state, request.headers())?;
    if !principal.is_admin() {
        return Err(AppError::Forbidden(msg::ACCESS_DENIED.into()));
    }
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
