//! Tenant credential extraction for the multi-tenant deployment.
//!
//! A tenant is identified by the AnyCrawl API key it calls with. The key
//! arrives as a path segment (`/{credential}/mcp`) or, on the credential-less
//! legacy stream endpoint, in the `x-anycrawl-api-key` header or an
//! `Authorization: Bearer` header. The key doubles as the partition key of the
//! session registry and as the bearer credential forwarded to the remote API,
//! so it is redacted wherever it is logged.

use axum::http::{HeaderMap, header};

/// Header carrying the tenant credential
pub const API_KEY_HEADER: &str = "x-anycrawl-api-key";

/// Characters of a credential kept visible in logs
const VISIBLE_PREFIX: usize = 4;

/// Whether a path segment can be used as a tenant credential
pub fn is_valid_credential(credential: &str) -> bool {
    !credential.is_empty()
        && credential.len() <= 256
        && credential
            .chars()
            .all(|c| c.is_ascii_graphic() && c != '/' && c != '?' && c != '#')
}

/// The tenant credential carried by request headers, if any.
///
/// `x-anycrawl-api-key` takes precedence over `Authorization: Bearer`.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_key_header = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                let (scheme, token) = v.trim().split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
            })
    };

    from_key_header
        .filter(|c| is_valid_credential(c))
        .or_else(|| from_bearer().filter(|c| is_valid_credential(c)))
        .map(str::to_string)
}

/// Log-safe rendering of a credential
pub fn redact(credential: &str) -> String {
    if credential.len() <= VISIBLE_PREFIX * 2 || !credential.is_ascii() {
        return "****".to_string();
    }
    format!("{}****", &credential[..VISIBLE_PREFIX])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_key_header_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("ac-key"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer ac-bearer"),
        );
        assert_eq!(credential_from_headers(&headers).as_deref(), Some("ac-key"));
    }

    #[test]
    fn test_bearer_credential() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("bearer ac-bearer"),
        );
        assert_eq!(
            credential_from_headers(&headers).as_deref(),
            Some("ac-bearer")
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(credential_from_headers(&headers).is_none());
    }

    #[test]
    fn test_blank_header_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("  "));
        assert!(credential_from_headers(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer k1"));
        assert_eq!(credential_from_headers(&headers).as_deref(), Some("k1"));
    }

    #[test]
    fn test_credential_validation() {
        assert!(is_valid_credential("ac-0123456789abcdef"));
        assert!(!is_valid_credential(""));
        assert!(!is_valid_credential("has space"));
        assert!(!is_valid_credential("a/b"));
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("ac-0123456789"), "ac-0****");
        assert_eq!(redact("short"), "****");
        assert_eq!(redact("default"), "****");
    }
}
