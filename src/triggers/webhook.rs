//! Webhook path and auth helpers

use crate::error::{Error, Result};
use crate::workflow::types::WebhookAuth;
use std::collections::HashMap;

pub const WEBHOOK_PREFIX: &str = "/webhook/";

pub fn webhook_path(trigger_id: &str) -> String {
    format!("{WEBHOOK_PREFIX}{trigger_id}")
}

/// Leading slash, no trailing slash, no query string.
pub fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default().trim();
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Check an inbound request's headers against the trigger's auth descriptor.
/// Header names match case-insensitively.
pub fn verify(auth: &WebhookAuth, headers: &HashMap<String, String>) -> Result<()> {
    let name = auth_header_name(auth);
    let expected = match auth {
        WebhookAuth::Bearer { token } => token.as_str(),
        WebhookAuth::Header { value, .. } => value.as_str(),
    };

    let provided = header(headers, name)
        .ok_or_else(|| Error::Unauthorized(format!("missing '{name}' header")))?;

    let provided = match auth {
        WebhookAuth::Bearer { .. } => provided
            .strip_prefix("Bearer ")
            .or_else(|| provided.strip_prefix("bearer "))
            .unwrap_or(provided),
        WebhookAuth::Header { .. } => provided,
    };

    if constant_time_eq(expected.as_bytes(), provided.trim().as_bytes()) {
        Ok(())
    } else {
        Err(Error::Unauthorized(format!("'{name}' header does not match")))
    }
}

/// Headers safe to hand to a run: the auth header named by `auth` is dropped.
pub fn redact(
    auth: Option<&WebhookAuth>,
    headers: &HashMap<String, String>,
) -> HashMap<String, String> {
    let secret = auth.map(auth_header_name);
    headers
        .iter()
        .filter(|(key, _)| secret.map_or(true, |name| !key.eq_ignore_ascii_case(name)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn auth_header_name(auth: &WebhookAuth) -> &str {
    match auth {
        WebhookAuth::Bearer { .. } => "authorization",
        WebhookAuth::Header { name, .. } => name.as_str(),
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("webhook/abc/"), "/webhook/abc");
        assert_eq!(normalize_path("/webhook/abc?x=1"), "/webhook/abc");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(webhook_path("webhook_1_2"), "/webhook/webhook_1_2");
    }

    #[test]
    fn test_bearer_token() {
        let auth = WebhookAuth::Bearer {
            token: "s3cret".to_string(),
        };
        assert!(verify(&auth, &headers(&[("Authorization", "Bearer s3cret")])).is_ok());
        assert!(matches!(
            verify(&auth, &headers(&[("authorization", "Bearer nope")])),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(verify(&auth, &headers(&[])), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn test_custom_header_is_case_insensitive() {
        let auth = WebhookAuth::Header {
            name: "X-Signature".to_string(),
            value: "abc".to_string(),
        };
        assert!(verify(&auth, &headers(&[("x-signature", "abc")])).is_ok());
        assert!(verify(&auth, &headers(&[("X-SIGNATURE", "abd")])).is_err());
    }

    #[test]
    fn test_redact_drops_only_the_auth_header() {
        let incoming = headers(&[
            ("Authorization", "Bearer s3cret"),
            ("X-Signature", "abc"),
            ("content-type", "application/json"),
        ]);

        let bearer = WebhookAuth::Bearer {
            token: "s3cret".to_string(),
        };
        let kept = redact(Some(&bearer), &incoming);
        assert!(!kept.contains_key("Authorization"));
        assert_eq!(kept.len(), 2);

        let custom = WebhookAuth::Header {
            name: "x-signature".to_string(),
            value: "abc".to_string(),
        };
        let kept = redact(Some(&custom), &incoming);
        assert!(!kept.contains_key("X-Signature"));
        assert!(kept.contains_key("Authorization"));

        assert_eq!(redact(None, &incoming), incoming);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }
}
