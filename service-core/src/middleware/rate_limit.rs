use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Quota allowing `attempts` requests per `window_seconds`, replenished evenly.
pub fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
    let period_ms = (window_seconds.max(1) * 1000) / u64::from(burst.get());
    Quota::with_period(Duration::from_millis(period_ms.max(1)))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Right-most `x-forwarded-for` hop, the peer seen by the proxy in front of
/// us. Earlier hops are whatever the caller sent.
pub fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.rsplit(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Forwarded client address, falling back to the socket peer.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    forwarded_for(request.headers()).or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ip) = client_ip(&request) else {
        tracing::warn!("Could not determine IP for rate limiting");
        return Ok(next.run(request).await);
    };

    match limiter.check_key(&ip) {
        Ok(_) => Ok(next.run(request).await),
        Err(negative) => {
            let wait_time = negative.wait_time_from(DefaultClock::default().now());
            tracing::warn!(client_ip = %ip, "Rate limit exceeded");
            Err(AppError::TooManyRequests(
                "Too many requests from this IP. Please try again later.".to_string(),
                Some(wait_time.as_secs().max(1)),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_rejects_after_burst() {
        let limiter = create_ip_rate_limiter(2, 60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_err());

        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check_key(&other).is_ok());
    }

    #[test]
    fn test_nearest_forwarded_hop_wins() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 198.51.100.4")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), Some("198.51.100.4".parse().unwrap()));
    }

    #[test]
    fn test_spoofed_first_hop_does_not_rotate_key() {
        let limiter = create_ip_rate_limiter(1, 60);
        for spoofed in ["1.1.1.1", "2.2.2.2"] {
            let request = Request::builder()
                .header("x-forwarded-for", format!("{}, 198.51.100.4", spoofed))
                .body(axum::body::Body::empty())
                .unwrap();
            let ip = client_ip(&request).unwrap();
            assert_eq!(ip, "198.51.100.4".parse::<IpAddr>().unwrap());
            if spoofed == "1.1.1.1" {
                assert!(limiter.check_key(&ip).is_ok());
            } else {
                assert!(limiter.check_key(&ip).is_err());
            }
        }
    }

    #[test]
    fn test_unparseable_forwarded_header_is_ignored() {
        let request = Request::builder()
            .header("x-forwarded-for", "not-an-ip")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), None);
    }
}
