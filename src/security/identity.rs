//! Client identification.
//!
//! One identifier keys both the rate limiter and the threat detector, so the
//! two subsystems always agree on who a client is.

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";
pub const REMOTE_ADDR: &str = "remote-addr";

/// Derive the stable client identifier for a request.
///
/// An authenticated user id wins over any header. Otherwise the first
/// `X-Forwarded-For` hop is used, then `X-Real-IP`, then `Remote-Addr`,
/// falling back to `"unknown"`. A blank first hop (`", 1.2.3.4"`) counts as
/// no `X-Forwarded-For` at all; later hops are never used.
pub fn identify(headers: &HeaderMap, user_id: Option<&str>) -> String {
    if let Some(user_id) = user_id {
        return format!("user:{}", user_id);
    }

    format!("ip:{}", client_ip(headers))
}

/// The client address as reported by proxy headers, without the `ip:` prefix.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = header_str(headers, X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| header_str(headers, X_REAL_IP))
        .or_else(|| header_str(headers, REMOTE_ADDR))
        .unwrap_or("unknown")
        .to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_user_id_takes_precedence() {
        let h = headers(&[(X_FORWARDED_FOR, "1.2.3.4")]);
        assert_eq!(identify(&h, Some("u1")), "user:u1");
    }

    #[test]
    fn test_first_forwarded_hop() {
        let h = headers(&[(X_FORWARDED_FOR, "1.2.3.4, 5.6.7.8"), (X_REAL_IP, "9.9.9.9")]);
        assert_eq!(identify(&h, None), "ip:1.2.3.4");
    }

    #[test]
    fn test_blank_first_hop_falls_through() {
        let h = headers(&[(X_FORWARDED_FOR, ", 1.2.3.4"), (X_REAL_IP, "9.9.9.9")]);
        assert_eq!(identify(&h, None), "ip:9.9.9.9");

        let h = headers(&[(X_FORWARDED_FOR, " , 1.2.3.4")]);
        assert_eq!(identify(&h, None), "ip:unknown");
    }

    #[test]
    fn test_header_priority() {
        let h = headers(&[(X_REAL_IP, "9.9.9.9"), (REMOTE_ADDR, "10.0.0.1")]);
        assert_eq!(identify(&h, None), "ip:9.9.9.9");

        let h = headers(&[(REMOTE_ADDR, "10.0.0.1")]);
        assert_eq!(identify(&h, None), "ip:10.0.0.1");
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(identify(&HeaderMap::new(), None), "ip:unknown");
    }
}
