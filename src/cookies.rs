//! Cookie header parsing and `Set-Cookie` formatting for the session cookies.

use axum::http::{HeaderMap, HeaderValue, header};

use crate::config::CookieConfig;

/// Parses every `Cookie` header into `(name, value)` pairs, preserving order.
/// Malformed pairs and non-UTF-8 headers are skipped.
pub fn parse_cookie_header(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Serializes cookies back into a single `Cookie` header value.
pub fn format_cookie_header(cookies: &[(String, String)]) -> Option<HeaderValue> {
    if cookies.is_empty() {
        return None;
    }
    let joined = cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ");
    HeaderValue::from_str(&joined).ok()
}

/// SetCookie
///
/// One pending `Set-Cookie` write. A `max_age` of zero expires the cookie.
#[derive(Debug, Clone, PartialEq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub max_age: i64,
    pub secure: bool,
}

impl SetCookie {
    pub fn new(name: &str, value: &str, max_age: i64, config: &CookieConfig) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            max_age,
            secure: config.secure,
        }
    }

    pub fn removal(name: &str, config: &CookieConfig) -> Self {
        Self::new(name, "", 0, config)
    }

    pub fn is_removal(&self) -> bool {
        self.max_age <= 0
    }

    pub fn to_header_value(&self) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.name, self.value, self.max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_headers_and_skips_garbage() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1; b=two ; junk"));
        headers.append(header::COOKIE, HeaderValue::from_static("=x; c=3=3"));

        let parsed = parse_cookie_header(&headers);
        assert_eq!(
            parsed,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string()),
                ("c".to_string(), "3=3".to_string()),
            ]
        );
    }

    #[test]
    fn secure_flag_follows_config() {
        let mut config = CookieConfig::default();
        let plain = SetCookie::new("sb-access-token", "tok", 3600, &config);
        assert_eq!(
            plain.to_header_value().unwrap(),
            "sb-access-token=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600"
        );

        config.secure = true;
        let removal = SetCookie::removal("sb-access-token", &config);
        assert!(removal.is_removal());
        assert!(removal.to_header_value().unwrap().to_str().unwrap().ends_with("Max-Age=0; Secure"));
    }
}
