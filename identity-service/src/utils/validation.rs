use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::{Validate, ValidationError};

/// JSON body extractor that runs `validator` rules before the handler sees it.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// Tenant slugs: 3-63 chars of `[a-z0-9-]`, no leading or trailing dash.
pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    let valid_chars = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if (3..=63).contains(&slug.len())
        && valid_chars
        && !slug.starts_with('-')
        && !slug.ends_with('-')
    {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_slug"))
    }
}

/// `resource:action` permission keys.
pub fn validate_permission_keys(keys: &[String]) -> Result<(), ValidationError> {
    if keys
        .iter()
        .all(|k| k.parse::<crate::models::PermissionKey>().is_ok())
    {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_permission_key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("acme").is_ok());
        assert!(validate_slug("acme-corp-2").is_ok());
        assert!(validate_slug("ac").is_err());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("acme_corp").is_err());
    }

    #[test]
    fn test_validate_permission_keys() {
        assert!(validate_permission_keys(&["users:read".to_string()]).is_ok());
        assert!(validate_permission_keys(&["users".to_string()]).is_err());
    }
}
