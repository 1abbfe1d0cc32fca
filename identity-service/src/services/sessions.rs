//! Session registry: opens, rotates and revokes refresh sessions and keeps the
//! revocation cache in step so access tokens of a revoked session stop working.

use std::sync::Arc;
use uuid::Uuid;

use super::jwt::{JwtService, RefreshTokenClaims, TokenResponse};
use super::store::CredentialStore;
use super::{ServiceError, TokenBlacklist};
use crate::models::{Session, User};
use crate::utils::{hash_token, ClientInfo};

/// Result of presenting a refresh token.
#[derive(Debug)]
pub enum Rotation {
    Rotated(TokenResponse),
    /// The token had already been exchanged. The session has been revoked.
    Reused,
}

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn TokenBlacklist>,
    jwt: JwtService,
}

fn revoked_key(session_id: Uuid) -> String {
    format!("revoked_session:{}", session_id)
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TokenBlacklist>,
        jwt: JwtService,
    ) -> Self {
        Self { store, cache, jwt }
    }

    /// Start a session for `user` and issue its first token pair.
    pub async fn open(
        &self,
        user: &User,
        client: &ClientInfo,
    ) -> Result<TokenResponse, ServiceError> {
        let mut session = Session::new(
            user.user_id,
            user.tenant_id,
            self.jwt.refresh_token_expiry_days(),
            client.user_agent.clone(),
            client.ip_address.clone(),
        );

        let refresh_token = self.jwt.generate_refresh_token(
            user.user_id,
            user.tenant_id,
            session.session_id,
            session.expiry_utc,
        )?;
        session.token_hash = hash_token(&refresh_token);
        self.store.insert_session(&session).await?;

        let access_token = self.jwt.generate_access_token(
            user.user_id,
            user.tenant_id,
            session.session_id,
            &user.email,
            session.expiry_utc,
        )?;

        tracing::info!(
            user_id = %user.user_id,
            tenant_id = %user.tenant_id,
            session_id = %session.session_id,
            "Session opened"
        );

        Ok(TokenResponse::new(
            access_token,
            refresh_token,
            self.jwt.access_token_expires_in(session.expiry_utc),
        ))
    }

    /// Load the live session a refresh token belongs to.
    pub async fn live_session(&self, claims: &RefreshTokenClaims) -> Result<Session, ServiceError> {
        let session = self
            .store
            .find_session(claims.sid)
            .await?
            .filter(|s| s.user_id == claims.sub && s.tenant_id == claims.tid)
            .ok_or(ServiceError::InvalidToken)?;

        if !session.is_valid() {
            return Err(ServiceError::SessionRevoked);
        }
        Ok(session)
    }

    /// Exchange a refresh token for a new pair within the same session.
    pub async fn rotate(
        &self,
        claims: &RefreshTokenClaims,
        presented_token: &str,
        email: &str,
    ) -> Result<Rotation, ServiceError> {
        let session = self.live_session(claims).await?;

        let refresh_token = self.jwt.generate_refresh_token(
            claims.sub,
            claims.tid,
            session.session_id,
            session.expiry_utc,
        )?;

        let swapped = self
            .store
            .rotate_session_token(
                session.session_id,
                &hash_token(presented_token),
                &hash_token(&refresh_token),
            )
            .await?;

        if !swapped {
            tracing::warn!(
                user_id = %claims.sub,
                session_id = %session.session_id,
                "Refresh token reuse detected, revoking session"
            );
            self.revoke(session.session_id).await?;
            return Ok(Rotation::Reused);
        }

        let access_token = self.jwt.generate_access_token(
            claims.sub,
            claims.tid,
            session.session_id,
            email,
            session.expiry_utc,
        )?;

        Ok(Rotation::Rotated(TokenResponse::new(
            access_token,
            refresh_token,
            self.jwt.access_token_expires_in(session.expiry_utc),
        )))
    }

    pub async fn list(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Vec<Session>, ServiceError> {
        self.store.list_active_sessions(tenant_id, user_id).await
    }

    /// Revoke one session. Returns `false` if it was not live.
    pub async fn revoke(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        let revoked = self.store.revoke_session(session_id).await?;
        self.mark_revoked(&[session_id]).await?;
        Ok(revoked)
    }

    /// Revoke a user's sessions except `keep`. Returns how many were revoked.
    pub async fn revoke_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<usize, ServiceError> {
        let revoked = self
            .store
            .revoke_user_sessions(tenant_id, user_id, keep)
            .await?;
        self.mark_revoked(&revoked).await?;
        Ok(revoked.len())
    }

    pub async fn revoke_tenant(&self, tenant_id: Uuid) -> Result<usize, ServiceError> {
        let revoked = self.store.revoke_tenant_sessions(tenant_id).await?;
        self.mark_revoked(&revoked).await?;
        tracing::info!(tenant_id = %tenant_id, count = revoked.len(), "Tenant sessions revoked");
        Ok(revoked.len())
    }

    /// Whether access tokens of this session must be rejected.
    pub async fn is_revoked(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self
            .cache
            .get_cache(&revoked_key(session_id))
            .await
            .map_err(ServiceError::Internal)?
            .is_some())
    }

    /// Whether access tokens of this session are still honoured: not revoked
    /// and the stored session has neither ended nor been revoked.
    pub async fn is_live(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        if self.is_revoked(session_id).await? {
            return Ok(false);
        }
        Ok(self
            .store
            .find_session(session_id)
            .await?
            .is_some_and(|s| s.is_valid()))
    }

    /// Blacklist a single access token for the rest of its lifetime.
    pub async fn blacklist_access_token(&self, jti: &str, exp: i64) -> Result<(), ServiceError> {
        let remaining = exp - chrono::Utc::now().timestamp();
        if remaining > 0 {
            self.cache
                .blacklist_token(jti, remaining)
                .await
                .map_err(ServiceError::Internal)?;
        }
        Ok(())
    }

    // Entries outlive every access token issued under the session.
    async fn mark_revoked(&self, session_ids: &[Uuid]) -> Result<(), ServiceError> {
        let ttl = self.jwt.access_token_expiry_seconds();
        for session_id in session_ids {
            self.cache
                .set_cache(&revoked_key(*session_id), "1", ttl)
                .await
                .map_err(ServiceError::Internal)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JwtAlgorithm, JwtConfig};
    use crate::services::{MockBlacklist, MockCredentialStore};

    fn registry() -> SessionRegistry {
        let jwt = JwtService::new(&JwtConfig {
            algorithm: JwtAlgorithm::HS256,
            secret: Some("test-secret-key-at-least-32-bytes-long".to_string()),
            private_key_path: None,
            public_key_path: None,
            issuer: "identity-test".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            mfa_token_expiry_minutes: 5,
        })
        .unwrap();
        SessionRegistry::new(
            Arc::new(MockCredentialStore::new()),
            Arc::new(MockBlacklist::new()),
            jwt,
        )
    }

    fn user() -> User {
        User::new(Uuid::new_v4(), "a@b.io", "hash".to_string(), None)
    }

    #[tokio::test]
    async fn test_rotation_then_reuse_revokes_session() {
        let registry = registry();
        let user = user();
        let tokens = registry.open(&user, &ClientInfo::default()).await.unwrap();
        let claims = registry
            .jwt
            .validate_refresh_token(&tokens.refresh_token)
            .unwrap();

        let rotated = registry
            .rotate(&claims, &tokens.refresh_token, &user.email)
            .await
            .unwrap();
        assert!(matches!(rotated, Rotation::Rotated(_)));

        let reused = registry
            .rotate(&claims, &tokens.refresh_token, &user.email)
            .await
            .unwrap();
        assert!(matches!(reused, Rotation::Reused));
        assert!(registry.is_revoked(claims.sid).await.unwrap());

        let err = registry.live_session(&claims).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionRevoked));
    }

    #[tokio::test]
    async fn test_expired_session_is_not_live() {
        let store = Arc::new(MockCredentialStore::new());
        let registry = SessionRegistry::new(
            store.clone(),
            Arc::new(MockBlacklist::new()),
            registry().jwt,
        );
        let user = user();
        let tokens = registry.open(&user, &ClientInfo::default()).await.unwrap();
        let sid = registry
            .jwt
            .validate_refresh_token(&tokens.refresh_token)
            .unwrap()
            .sid;
        assert!(registry.is_live(sid).await.unwrap());

        let mut session = store.find_session(sid).await.unwrap().unwrap();
        session.expiry_utc = chrono::Utc::now() - chrono::Duration::seconds(1);
        store.insert_session(&session).await.unwrap();

        assert!(!registry.is_live(sid).await.unwrap());
        assert!(!registry.is_live(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_user_keeps_current() {
        let registry = registry();
        let user = user();
        let first = registry.open(&user, &ClientInfo::default()).await.unwrap();
        registry.open(&user, &ClientInfo::default()).await.unwrap();
        let keep = registry
            .jwt
            .validate_refresh_token(&first.refresh_token)
            .unwrap()
            .sid;

        let count = registry
            .revoke_user(user.tenant_id, user.user_id, Some(keep))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(!registry.is_revoked(keep).await.unwrap());
        assert_eq!(
            registry.list(user.tenant_id, user.user_id).await.unwrap().len(),
            1
        );
    }
}
