//! Test helpers for identity-service integration tests.
//!
//! The router runs against the in-memory credential store and cache, so the
//! suite needs neither PostgreSQL nor Redis.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, IdentityConfig, InvitationConfig, JwtAlgorithm, JwtConfig,
        MfaConfig, RateLimitConfig, RedisConfig, SecurityConfig, SwaggerConfig, SwaggerMode,
    },
    db::seed_permission_catalog,
    services::{CredentialStore, MockBlacklist, MockCredentialStore, TokenBlacklist},
    AppState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_ADMIN_API_KEY: &str = "test-admin-key-12345";
pub const TEST_PASSWORD: &str = "correct-horse-42";
pub const MAX_FAILED_LOGINS: u32 = 3;

pub fn create_test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        jwt: JwtConfig {
            algorithm: JwtAlgorithm::HS256,
            secret: Some("test-secret-key-at-least-32-bytes-long".to_string()),
            private_key_path: None,
            public_key_path: None,
            issuer: "identity-test".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            mfa_token_expiry_minutes: 5,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            admin_api_key: TEST_ADMIN_API_KEY.to_string(),
            max_failed_logins: MAX_FAILED_LOGINS,
            lockout_minutes: 15,
            password_min_length: 8,
        },
        mfa: MfaConfig {
            issuer: "Identity Test".to_string(),
            backup_code_count: 4,
            max_verify_attempts: 5,
        },
        invitations: InvitationConfig {
            expiry_hours: 72,
            accept_url: "http://localhost:3000/invitations/accept".to_string(),
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            register_attempts: 1000,
            register_window_seconds: 60,
            global_ip_limit: 10000,
            global_ip_window_seconds: 60,
        },
    }
}

/// Router plus the state behind it, for assertions against the store.
#[derive(Clone)]
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

/// The owner account created by `register_tenant`.
pub struct Owner {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub slug: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(create_test_config()).await
    }

    pub async fn spawn_with(config: IdentityConfig) -> Self {
        let store = Arc::new(MockCredentialStore::new()) as Arc<dyn CredentialStore>;
        let cache = Arc::new(MockBlacklist::new()) as Arc<dyn TokenBlacklist>;
        seed_permission_catalog(store.as_ref())
            .await
            .expect("Failed to seed permission catalog");

        let state = AppState::new(config, store, cache).expect("Failed to build state");
        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self { router, state }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn register_tenant(&self, slug: &str) -> Owner {
        let email = format!("owner@{}.io", slug);
        let (status, body) = self
            .post(
                "/auth/register",
                None,
                json!({
                    "tenant_name": format!("{} Inc", slug),
                    "tenant_slug": slug,
                    "email": email,
                    "password": TEST_PASSWORD,
                    "display_name": "Owner",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);

        Owner {
            tenant_id: parse_uuid(&body["tenant"]["tenant_id"]),
            user_id: parse_uuid(&body["user"]["user_id"]),
            slug: slug.to_string(),
            email,
            access_token: body["tokens"]["access_token"].as_str().unwrap().to_string(),
            refresh_token: body["tokens"]["refresh_token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn login(&self, slug: &str, email: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            "/auth/login",
            None,
            json!({ "tenant_slug": slug, "email": email, "password": password }),
        )
        .await
    }

    /// Id of the tenant role called `name`.
    pub async fn role_id(&self, owner: &Owner, name: &str) -> Uuid {
        let (status, body) = self.get("/roles", &owner.access_token).await;
        assert_eq!(status, StatusCode::OK);
        let role = body
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["name"] == name)
            .unwrap_or_else(|| panic!("role {} not found", name));
        parse_uuid(&role["role_id"])
    }

    /// Create a user holding the named roles and sign them in.
    /// Returns `(user_id, access_token)`.
    pub async fn create_user(&self, owner: &Owner, email: &str, roles: &[&str]) -> (Uuid, String) {
        let mut role_ids = Vec::new();
        for name in roles {
            role_ids.push(self.role_id(owner, name).await);
        }

        let (status, body) = self
            .post(
                "/users",
                Some(&owner.access_token),
                json!({ "email": email, "password": TEST_PASSWORD, "role_ids": role_ids }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create user failed: {}", body);
        let user_id = parse_uuid(&body["user_id"]);

        let (status, body) = self.login(&owner.slug, email, TEST_PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        (user_id, body["access_token"].as_str().unwrap().to_string())
    }
}

pub fn parse_uuid(value: &Value) -> Uuid {
    value.as_str().unwrap().parse().unwrap()
}

/// TOTP code for `secret` at `now + offset_seconds`.
pub fn totp_code(secret: &str, offset_seconds: i64) -> String {
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret.to_string()).to_bytes().unwrap(),
        Some("Identity Test".to_string()),
        "test".to_string(),
    )
    .unwrap();
    let at = chrono::Utc::now().timestamp() + offset_seconds;
    totp.generate(at as u64)
}
