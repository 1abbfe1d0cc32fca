use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header::USER_AGENT, request::Parts},
};
use service_core::middleware::rate_limit::forwarded_for;
use std::convert::Infallible;
use std::net::SocketAddr;

/// Caller metadata recorded on sessions and audit entries.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip_address = forwarded_for(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip())
            })
            .map(|ip| ip.to_string());

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.chars().take(512).collect());

        Ok(ClientInfo {
            ip_address,
            user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(forwarded: &str) -> ClientInfo {
        let (mut parts, _) = Request::builder()
            .header("x-forwarded-for", forwarded)
            .header(USER_AGENT, "curl/8.0")
            .body(())
            .unwrap()
            .into_parts();
        ClientInfo::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_records_nearest_forwarded_hop() {
        let client = extract("10.9.9.9, 203.0.113.7").await;
        assert_eq!(client.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(client.user_agent.as_deref(), Some("curl/8.0"));
    }
}
