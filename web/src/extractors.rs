//! Custom Axum extractors.
//!
//! - `ClientIp`: client address used as the rate-limit key

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Client IP address.
///
/// # Priority
///
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. Connection IP, when the server was started with connect info
/// 4. `127.0.0.1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let connected = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());

        Ok(Self(
            forwarded_ip(&parts.headers)
                .or(connected)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ))
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header_value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header_value("X-Forwarded-For")
        .and_then(|forwarded| forwarded.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| header_value("X-Real-IP").and_then(|ip| ip.trim().parse().ok()))
}
