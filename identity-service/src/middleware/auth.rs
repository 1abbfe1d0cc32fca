use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{services::AccessTokenClaims, AppState};

/// Require a live bearer access token. The validated claims are stored in
/// request extensions for [`AuthUser`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::AuthError(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state.jwt.validate_access_token(token)?;

    // Cache failures reject the request.
    let blacklisted = state.cache.is_blacklisted(&claims.jti).await.map_err(|e| {
        tracing::error!(error = %e, "Cache error checking token blacklist");
        AppError::InternalError(e)
    })?;
    if blacklisted {
        return Err(AppError::AuthError(anyhow::anyhow!("Token has been revoked")));
    }

    if !state.sessions.is_live(claims.sid).await? {
        tracing::debug!(session_id = %claims.sid, "Access token of ended session rejected");
        return Err(AppError::AuthError(anyhow::anyhow!("Session revoked or expired")));
    }

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Claims of the authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AccessTokenClaims);

impl AuthUser {
    pub fn user_id(&self) -> uuid::Uuid {
        self.0.sub
    }

    pub fn tenant_id(&self) -> uuid::Uuid {
        self.0.tid
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.0.sid
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessTokenClaims>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Auth claims missing from request extensions"
                ))
            })
    }
}
