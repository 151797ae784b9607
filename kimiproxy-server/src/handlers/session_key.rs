use cookie::{Cookie, SameSite};
use http::header::{HeaderMap, COOKIE};
use uuid::Uuid;

/// Header clients may use to pin a session without cookies.
pub const SESSION_HEADER: &str = "x-session-id";

/// The key identifying one proxy-side conversation, plus whether it was
/// minted on this request (in which case the response sets the cookie).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyResolution {
    pub key: String,
    pub generated: bool,
}

/// Resolves the session key in precedence order: explicit body value, then
/// the `x-session-id` header, then the session cookie, then a fresh UUID.
pub fn resolve_session_key(
    headers: &HeaderMap,
    body_key: Option<&str>,
    cookie_name: &str,
) -> SessionKeyResolution {
    if let Some(key) = body_key.map(str::trim).filter(|key| !key.is_empty()) {
        return SessionKeyResolution {
            key: key.to_string(),
            generated: false,
        };
    }

    if let Some(key) = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
    {
        return SessionKeyResolution {
            key: key.to_string(),
            generated: false,
        };
    }

    if let Some(key) = cookie_value(headers, cookie_name) {
        return SessionKeyResolution {
            key,
            generated: false,
        };
    }

    SessionKeyResolution {
        key: Uuid::new_v4().to_string(),
        generated: true,
    }
}

fn cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for cookie in Cookie::split_parse(raw).flatten() {
            if cookie.name() == cookie_name && !cookie.value().is_empty() {
                return Some(cookie.value().to_string());
            }
        }
    }
    None
}

/// `Set-Cookie` value for a freshly generated session key. The lifetime
/// mirrors the session TTL so the cookie and the server-side entry expire
/// together.
#[must_use]
pub fn session_cookie(cookie_name: &str, key: &str, ttl_seconds: u64) -> String {
    let max_age = time::Duration::seconds(ttl_seconds.min(i64::MAX as u64) as i64);
    Cookie::build((cookie_name.to_string(), key.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn body_key_wins_over_header_and_cookie() {
        let headers = headers(&[("x-session-id", "from-header"), ("cookie", "sid=from-cookie")]);

        let resolved = resolve_session_key(&headers, Some("from-body"), "sid");

        assert_eq!(resolved.key, "from-body");
        assert!(!resolved.generated);
    }

    #[test]
    fn header_wins_over_cookie() {
        let headers = headers(&[("x-session-id", "from-header"), ("cookie", "sid=from-cookie")]);

        let resolved = resolve_session_key(&headers, None, "sid");

        assert_eq!(resolved.key, "from-header");
    }

    #[test]
    fn cookie_is_used_when_nothing_else_is_present() {
        let headers = headers(&[("cookie", "theme=dark; sid=from-cookie")]);

        let resolved = resolve_session_key(&headers, None, "sid");

        assert_eq!(resolved.key, "from-cookie");
        assert!(!resolved.generated);
    }

    #[test]
    fn blank_body_key_falls_through() {
        let headers = headers(&[("cookie", "sid=from-cookie")]);

        let resolved = resolve_session_key(&headers, Some("   "), "sid");

        assert_eq!(resolved.key, "from-cookie");
    }

    #[test]
    fn absent_everything_generates_a_uuid() {
        let resolved = resolve_session_key(&HeaderMap::new(), None, "sid");

        assert!(resolved.generated);
        assert!(Uuid::parse_str(&resolved.key).is_ok());
    }

    #[test]
    fn generated_keys_are_unique() {
        let first = resolve_session_key(&HeaderMap::new(), None, "sid");
        let second = resolve_session_key(&HeaderMap::new(), None, "sid");

        assert_ne!(first.key, second.key);
    }

    #[test]
    fn session_cookie_carries_scope_and_lifetime() {
        let value = session_cookie("sid", "abc", 3600);

        assert!(value.starts_with("sid=abc"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("Max-Age=3600"));
    }
}
