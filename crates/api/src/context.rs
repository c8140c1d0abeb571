//! Builds the per-request context from request headers.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{RequestContext, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the authenticated caller, set by the gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Extracts a [`RequestContext`] bounded by the configured call timeout.
pub struct Ctx(pub RequestContext);

impl FromRequestParts<Arc<AppState>> for Ctx {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let ctx = RequestContext::with_timeout(state.call_timeout);
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Ctx(ctx));
        };

        let user_id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid {USER_ID_HEADER} header")))?;

        Ok(Ctx(ctx.for_caller(UserId::new(user_id))))
    }
}
