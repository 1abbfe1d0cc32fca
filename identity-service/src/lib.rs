pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, IdentityConfig, SwaggerMode};
use crate::middleware::admin::ADMIN_API_KEY_HEADER;
use crate::services::{
    AuditRecorder, AuthService, CredentialStore, JwtService, MfaService, PermissionResolver,
    SessionRegistry, TokenBlacklist,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::registration::register,
        handlers::auth::session::login,
        handlers::auth::session::logout,
        handlers::auth::session::refresh,
        handlers::auth::session::introspect,
        handlers::auth::mfa::verify_mfa,
        handlers::me::get_me,
        handlers::me::update_me,
        handlers::me::change_password,
        handlers::me::list_my_sessions,
        handlers::me::revoke_my_session,
        handlers::me::revoke_other_sessions,
        handlers::mfa::enroll,
        handlers::mfa::confirm,
        handlers::mfa::disable,
        handlers::mfa::regenerate_backup_codes,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::MfaVerifyRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::IntrospectRequest,
            dtos::auth::IntrospectResponse,
            dtos::me::MeResponse,
            dtos::me::UpdateProfileRequest,
            dtos::me::ChangePasswordRequest,
            dtos::me::RevokedSessionsResponse,
            dtos::me::MfaEnrollResponse,
            dtos::me::MfaCodeRequest,
            dtos::me::MfaDisableRequest,
            dtos::me::BackupCodesResponse,
            services::TokenResponse,
            models::Tenant,
            models::TenantStatus,
            models::UserResponse,
            models::UserStatus,
            models::SessionInfo,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Sign-in, token refresh and introspection"),
        (name = "Account", description = "Profile, password and sessions of the signed-in user"),
        (name = "Two-factor", description = "TOTP enrollment and backup codes"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "admin_api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(ADMIN_API_KEY_HEADER))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn CredentialStore>,
    pub cache: Arc<dyn TokenBlacklist>,
    pub jwt: JwtService,
    pub auth: AuthService,
    pub sessions: SessionRegistry,
    pub permissions: PermissionResolver,
    pub mfa: MfaService,
    pub audit: AuditRecorder,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the services over a credential store and a revocation cache.
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TokenBlacklist>,
    ) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt).map_err(AppError::ConfigError)?;
        let sessions = SessionRegistry::new(store.clone(), cache.clone(), jwt.clone());
        let mfa = MfaService::new(store.clone(), cache.clone(), config.mfa.clone());
        let audit = AuditRecorder::new(store.clone());
        let permissions = PermissionResolver::new(store.clone());
        let auth = AuthService::new(
            store.clone(),
            cache.clone(),
            jwt.clone(),
            sessions.clone(),
            mfa.clone(),
            audit.clone(),
            config.security.clone(),
        );

        let limits = &config.rate_limit;
        let login_rate_limiter =
            create_ip_rate_limiter(limits.login_attempts, limits.login_window_seconds);
        let register_rate_limiter =
            create_ip_rate_limiter(limits.register_attempts, limits.register_window_seconds);
        let ip_rate_limiter =
            create_ip_rate_limiter(limits.global_ip_limit, limits.global_ip_window_seconds);

        Ok(Self {
            config,
            store,
            cache,
            jwt,
            auth,
            sessions,
            permissions,
            mfa,
            audit,
            login_rate_limiter,
            register_rate_limiter,
            ip_rate_limiter,
        })
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Platform operator routes
    let admin_routes = Router::new()
        .route(
            "/admin/tenants/:tenant_id/status",
            put(handlers::admin::update_tenant_status),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/mfa/verify", post(handlers::auth::verify_mfa))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let authenticated = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        // Current user
        .route(
            "/me",
            get(handlers::me::get_me).patch(handlers::me::update_me),
        )
        .route("/me/password", post(handlers::me::change_password))
        .route("/me/sessions", get(handlers::me::list_my_sessions))
        .route(
            "/me/sessions/revoke-others",
            post(handlers::me::revoke_other_sessions),
        )
        .route(
            "/me/sessions/:session_id",
            delete(handlers::me::revoke_my_session),
        )
        .route("/me/mfa/enroll", post(handlers::mfa::enroll))
        .route("/me/mfa/confirm", post(handlers::mfa::confirm))
        .route("/me/mfa/disable", post(handlers::mfa::disable))
        .route(
            "/me/mfa/backup-codes",
            post(handlers::mfa::regenerate_backup_codes),
        )
        // Tenant
        .route(
            "/tenant",
            get(handlers::tenant::get_tenant).patch(handlers::tenant::update_tenant),
        )
        // Users
        .route(
            "/users",
            get(handlers::user::list_users).post(handlers::user::create_user),
        )
        .route(
            "/users/:user_id",
            get(handlers::user::get_user)
                .patch(handlers::user::update_user)
                .delete(handlers::user::delete_user),
        )
        .route("/users/:user_id/roles", put(handlers::user::set_user_roles))
        .route(
            "/users/:user_id/sessions",
            delete(handlers::user::revoke_user_sessions),
        )
        // Roles and permissions
        .route("/permissions", get(handlers::authz::list_permissions))
        .route(
            "/roles",
            get(handlers::role::list_roles).post(handlers::role::create_role),
        )
        .route(
            "/roles/:role_id",
            get(handlers::role::get_role)
                .patch(handlers::role::update_role)
                .delete(handlers::role::delete_role),
        )
        .route(
            "/roles/:role_id/permissions",
            put(handlers::role::set_role_permissions),
        )
        .route("/authz/check", post(handlers::authz::check))
        // Invitations
        .route(
            "/invitations",
            get(handlers::invitation::list_invitations)
                .post(handlers::invitation::create_invitation),
        )
        .route(
            "/invitations/:invitation_id",
            delete(handlers::invitation::revoke_invitation),
        )
        // Audit
        .route("/audit-logs", get(handlers::audit::list_audit_logs))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    // Swagger UI is always on in dev
    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger.enabled == SwaggerMode::Public,
    };

    if swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let cors_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    let app = app
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/introspect", post(handlers::auth::introspect))
        .route(
            "/invitations/lookup",
            get(handlers::invitation::lookup_invitation),
        )
        .route(
            "/invitations/accept",
            post(handlers::invitation::accept_invitation),
        )
        .merge(login_route)
        .merge(register_route)
        .merge(admin_routes)
        .merge(authenticated)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(cors_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(ADMIN_API_KEY_HEADER),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Store or cache unavailable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Credential store health check failed");
        AppError::ServiceUnavailable
    })?;

    state.cache.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Cache health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up",
            "cache": "up"
        }
    })))
}
