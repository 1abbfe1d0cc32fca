use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::{
    config::SecurityConfig,
    dtos::auth::{
        IntrospectResponse, LoginRequest, LoginResponse, MfaVerifyRequest, RegisterRequest,
        RegisterResponse,
    },
    models::{
        AuditAction, AuditLog, AuditOutcome, Role, PermissionKey, SystemRole, Tenant, User,
    },
    services::{
        AccessTokenClaims, AuditRecorder, CredentialStore, JwtService, MfaService, Rotation,
        ServiceError, SessionRegistry, TenantRegistration, TokenBlacklist, TokenResponse,
    },
    utils::{
        hash_password, verify_dummy_password, verify_password, ClientInfo, Password,
        PasswordHashString, PasswordPolicy,
    },
};

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn TokenBlacklist>,
    jwt: JwtService,
    sessions: SessionRegistry,
    mfa: MfaService,
    audit: AuditRecorder,
    security: SecurityConfig,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TokenBlacklist>,
        jwt: JwtService,
        sessions: SessionRegistry,
        mfa: MfaService,
        audit: AuditRecorder,
        security: SecurityConfig,
    ) -> Self {
        Self {
            store,
            cache,
            jwt,
            sessions,
            mfa,
            audit,
            security,
        }
    }

    pub fn password_policy(&self) -> PasswordPolicy {
        PasswordPolicy::new(self.security.password_min_length)
    }

    /// Hash a password after checking it against the configured policy.
    pub fn hash_new_password(&self, password: &Password) -> Result<String, ServiceError> {
        self.password_policy()
            .check(password)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        let hash = hash_password(password)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))?;
        Ok(hash.into_string())
    }

    /// Create a tenant with its system roles and owner account, then sign the
    /// owner in.
    pub async fn register(
        &self,
        req: RegisterRequest,
        client: &ClientInfo,
    ) -> Result<RegisterResponse, ServiceError> {
        let password_hash = self.hash_new_password(&req.password)?;

        let tenant = Tenant::new(
            req.tenant_slug.trim().to_lowercase(),
            req.tenant_name.trim().to_string(),
        );
        let roles: Vec<(Role, Vec<PermissionKey>)> = SystemRole::ALL
            .iter()
            .map(|r| (r.to_role(tenant.tenant_id), r.permissions()))
            .collect();
        let owner_role_ids = roles
            .iter()
            .filter(|(role, _)| role.name == SystemRole::Owner.name())
            .map(|(role, _)| role.role_id)
            .collect();
        let owner = User::new(
            tenant.tenant_id,
            &req.email,
            password_hash,
            req.display_name.filter(|n| !n.trim().is_empty()),
        );

        let registration = TenantRegistration {
            tenant,
            roles,
            owner,
            owner_role_ids,
        };
        self.store.register_tenant(&registration).await?;

        let TenantRegistration { tenant, owner, .. } = registration;
        tracing::info!(
            tenant_id = %tenant.tenant_id,
            user_id = %owner.user_id,
            "Tenant registered"
        );

        self.audit
            .record(
                AuditLog::new(tenant.tenant_id, AuditAction::TenantRegister, AuditOutcome::Success)
                    .actor(owner.user_id)
                    .resource("tenant", tenant.tenant_id)
                    .client(client.ip_address.clone(), client.user_agent.clone())
                    .details(json!({ "slug": tenant.slug })),
            )
            .await;

        let tokens = self.sessions.open(&owner, client).await?;

        Ok(RegisterResponse {
            user: owner.sanitized(),
            tenant,
            tokens,
        })
    }

    pub async fn login(
        &self,
        req: LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginResponse, ServiceError> {
        let tenant = self
            .store
            .find_tenant_by_slug(req.tenant_slug.trim())
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        if !tenant.status.allows_sign_in() {
            return Err(ServiceError::TenantInactive);
        }

        let failure = |reason: &str| {
            AuditLog::new(tenant.tenant_id, AuditAction::Login, AuditOutcome::Failure)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "reason": reason }))
        };

        let Some(mut user) = self
            .store
            .find_user_by_email(tenant.tenant_id, &req.email)
            .await?
        else {
            verify_dummy_password(&req.password);
            self.audit.record(failure("unknown_user")).await;
            return Err(ServiceError::InvalidCredentials);
        };

        let now = Utc::now();
        if user.is_locked(now) {
            self.audit
                .record(failure("locked").actor(user.user_id))
                .await;
            return Err(ServiceError::AccountLocked);
        }

        let password_ok = verify_password(
            &req.password,
            &PasswordHashString::new(user.password_hash.clone()),
        )
        .map_err(ServiceError::Internal)?;

        if !password_ok {
            let locked = self
                .store
                .record_failed_login(
                    user.tenant_id,
                    user.user_id,
                    self.security.max_failed_logins,
                    now + Duration::minutes(self.security.lockout_minutes),
                )
                .await?;
            if locked {
                tracing::warn!(user_id = %user.user_id, "Account locked after failed sign-in attempts");
            }
            self.audit
                .record(failure("bad_password").actor(user.user_id))
                .await;
            return Err(ServiceError::InvalidCredentials);
        }

        if !user.is_active() {
            self.audit.record(failure("disabled").actor(user.user_id)).await;
            return Err(ServiceError::AccountDisabled);
        }

        // A concurrent failure may have locked the account since it was read.
        if !self
            .store
            .record_successful_login(user.tenant_id, user.user_id, now)
            .await?
        {
            self.audit
                .record(failure("locked").actor(user.user_id))
                .await;
            return Err(ServiceError::AccountLocked);
        }
        user.failed_login_count = 0;
        user.locked_until_utc = None;
        user.last_login_utc = Some(now);

        let success = AuditLog::new(tenant.tenant_id, AuditAction::Login, AuditOutcome::Success)
            .actor(user.user_id)
            .client(client.ip_address.clone(), client.user_agent.clone());

        if user.mfa_enabled {
            let (mfa_token, _) = self
                .jwt
                .generate_mfa_token(user.user_id, user.tenant_id)?;
            self.audit
                .record(success.details(json!({ "mfa_required": true })))
                .await;
            return Ok(LoginResponse::challenge(
                mfa_token,
                self.jwt.mfa_token_expiry_seconds(),
            ));
        }

        let tokens = self.sessions.open(&user, client).await?;
        self.audit.record(success).await;
        Ok(LoginResponse::tokens(tokens))
    }

    /// Complete a login that stopped at the second factor.
    pub async fn verify_mfa(
        &self,
        req: MfaVerifyRequest,
        client: &ClientInfo,
    ) -> Result<LoginResponse, ServiceError> {
        let claims = self.jwt.validate_mfa_token(&req.mfa_token)?;

        if self
            .cache
            .is_blacklisted(&claims.jti)
            .await
            .map_err(ServiceError::Internal)?
        {
            return Err(ServiceError::InvalidToken);
        }

        let remaining = (claims.exp - Utc::now().timestamp()).max(1);
        let attempts = self
            .cache
            .increment(&format!("mfa_attempts:{}", claims.jti), remaining)
            .await
            .map_err(ServiceError::Internal)?;
        let max_attempts = i64::from(self.mfa.max_verify_attempts());
        if attempts > max_attempts {
            self.burn_challenge(&claims.jti, remaining).await?;
            return Err(ServiceError::MfaAttemptsExceeded);
        }

        let tenant = self
            .store
            .find_tenant(claims.tid)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !tenant.status.allows_sign_in() {
            return Err(ServiceError::TenantInactive);
        }

        let mut user = self
            .store
            .find_user(claims.tid, claims.sub)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !user.is_active() {
            return Err(ServiceError::AccountDisabled);
        }
        if !user.mfa_enabled {
            return Err(ServiceError::InvalidToken);
        }

        let Some(factor) = self.mfa.verify_second_factor(&mut user, &req.code).await? else {
            self.audit
                .record(
                    AuditLog::new(user.tenant_id, AuditAction::MfaVerify, AuditOutcome::Failure)
                        .actor(user.user_id)
                        .client(client.ip_address.clone(), client.user_agent.clone())
                        .details(json!({ "attempt": attempts })),
                )
                .await;
            if attempts >= max_attempts {
                self.burn_challenge(&claims.jti, remaining).await?;
                return Err(ServiceError::MfaAttemptsExceeded);
            }
            return Err(ServiceError::InvalidMfaCode);
        };

        self.burn_challenge(&claims.jti, remaining).await?;

        let tokens = self.sessions.open(&user, client).await?;
        self.audit
            .record(
                AuditLog::new(user.tenant_id, AuditAction::MfaVerify, AuditOutcome::Success)
                    .actor(user.user_id)
                    .client(client.ip_address.clone(), client.user_agent.clone())
                    .details(json!({
                        "factor": factor.as_str(),
                        "backup_codes_remaining": user.backup_code_hashes.len(),
                    })),
            )
            .await;

        Ok(LoginResponse::tokens(tokens))
    }

    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<TokenResponse, ServiceError> {
        let claims = self.jwt.validate_refresh_token(refresh_token)?;

        let tenant = self
            .store
            .find_tenant(claims.tid)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !tenant.status.allows_sign_in() {
            return Err(ServiceError::TenantInactive);
        }

        let user = self
            .store
            .find_user(claims.tid, claims.sub)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !user.is_active() {
            return Err(ServiceError::AccountDisabled);
        }

        match self.sessions.rotate(&claims, refresh_token, &user.email).await? {
            Rotation::Rotated(tokens) => {
                self.audit
                    .record(
                        AuditLog::new(user.tenant_id, AuditAction::Refresh, AuditOutcome::Success)
                            .actor(user.user_id)
                            .resource("session", claims.sid)
                            .client(client.ip_address.clone(), client.user_agent.clone()),
                    )
                    .await;
                Ok(tokens)
            }
            Rotation::Reused => {
                self.audit
                    .record(
                        AuditLog::new(user.tenant_id, AuditAction::TokenReuse, AuditOutcome::Denied)
                            .actor(user.user_id)
                            .resource("session", claims.sid)
                            .client(client.ip_address.clone(), client.user_agent.clone()),
                    )
                    .await;
                Err(ServiceError::SessionRevoked)
            }
        }
    }

    /// Revoke the caller's session and blacklist the presented access token.
    pub async fn logout(
        &self,
        claims: &AccessTokenClaims,
        client: &ClientInfo,
    ) -> Result<(), ServiceError> {
        self.sessions.revoke(claims.sid).await?;
        self.sessions
            .blacklist_access_token(&claims.jti, claims.exp)
            .await?;

        tracing::info!(user_id = %claims.sub, session_id = %claims.sid, "User logged out");

        self.audit
            .record(
                AuditLog::new(claims.tid, AuditAction::Logout, AuditOutcome::Success)
                    .actor(claims.sub)
                    .resource("session", claims.sid)
                    .client(client.ip_address.clone(), client.user_agent.clone()),
            )
            .await;
        Ok(())
    }

    /// Report whether an access token is currently usable. Cache errors read
    /// as inactive.
    pub async fn introspect(&self, token: &str) -> IntrospectResponse {
        let Ok(claims) = self.jwt.validate_access_token(token) else {
            return IntrospectResponse::inactive();
        };

        let blacklisted = match self.cache.is_blacklisted(&claims.jti).await {
            Ok(blacklisted) => blacklisted,
            Err(e) => {
                tracing::error!(error = %e, "Cache error checking blacklist during introspection");
                true
            }
        };
        let revoked = match self.sessions.is_live(claims.sid).await {
            Ok(live) => !live,
            Err(e) => {
                tracing::error!(error = %e, "Error checking session during introspection");
                true
            }
        };

        if blacklisted || revoked {
            return IntrospectResponse::inactive();
        }

        IntrospectResponse {
            active: true,
            sub: Some(claims.sub),
            tid: Some(claims.tid),
            sid: Some(claims.sid),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            jti: Some(claims.jti),
        }
    }

    /// Change the caller's password and sign out their other devices.
    pub async fn change_password(
        &self,
        claims: &AccessTokenClaims,
        current_password: &Password,
        new_password: &Password,
        client: &ClientInfo,
    ) -> Result<usize, ServiceError> {
        let mut user = self
            .store
            .find_user(claims.tid, claims.sub)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;

        let current_ok = verify_password(
            current_password,
            &PasswordHashString::new(user.password_hash.clone()),
        )
        .map_err(ServiceError::Internal)?;
        if !current_ok {
            self.audit
                .record(
                    AuditLog::new(claims.tid, AuditAction::PasswordChange, AuditOutcome::Failure)
                        .actor(claims.sub)
                        .client(client.ip_address.clone(), client.user_agent.clone()),
                )
                .await;
            return Err(ServiceError::Forbidden(
                "Current password is incorrect".to_string(),
            ));
        }

        user.password_hash = self.hash_new_password(new_password)?;
        user.updated_utc = Utc::now();
        self.store.update_user(&user).await?;

        let revoked = self
            .sessions
            .revoke_user(claims.tid, claims.sub, Some(claims.sid))
            .await?;

        self.audit
            .record(
                AuditLog::new(claims.tid, AuditAction::PasswordChange, AuditOutcome::Success)
                    .actor(claims.sub)
                    .resource("user", claims.sub)
                    .client(client.ip_address.clone(), client.user_agent.clone())
                    .details(json!({ "sessions_revoked": revoked })),
            )
            .await;

        Ok(revoked)
    }

    /// Check a password for step-up actions such as disabling MFA.
    pub fn check_password(&self, user: &User, password: &Password) -> Result<(), ServiceError> {
        let ok = verify_password(password, &PasswordHashString::new(user.password_hash.clone()))
            .map_err(ServiceError::Internal)?;
        if ok {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("Password is incorrect".to_string()))
        }
    }

    async fn burn_challenge(&self, jti: &str, remaining: i64) -> Result<(), ServiceError> {
        self.cache
            .blacklist_token(jti, remaining)
            .await
            .map_err(ServiceError::Internal)
    }
}
