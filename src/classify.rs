//! Status-code classifier for error responses.
//!
//! Turns error statuses (and a few known challenge pages) into the
//! application-level taxonomy consumed by provider wrappers: access denied,
//! CAPTCHA, rate limited, or a generic status error.

use crate::error::ClassifiedError;
use crate::response::HttpResponse;

/// Hosts that serve a CAPTCHA interstitial regardless of status.
const CAPTCHA_HOSTS: &[&str] = &["sorry.google.com", "www.google.com/sorry"];

/// Classifies a response, returning `None` for unremarkable successes.
pub fn classify_response(response: &HttpResponse) -> Option<ClassifiedError> {
    let status = response.status();

    if is_captcha_host(response) {
        return Some(ClassifiedError::Captcha { status });
    }
    if response.ok() {
        return None;
    }
    if is_cdn_challenge(response) {
        return Some(ClassifiedError::Captcha { status });
    }
    match status {
        429 => Some(ClassifiedError::TooManyRequests {
            status,
            retry_after: retry_after_seconds(response),
        }),
        402 | 403 => Some(ClassifiedError::AccessDenied { status }),
        _ => Some(ClassifiedError::HttpStatus { status }),
    }
}

fn is_captcha_host(response: &HttpResponse) -> bool {
    let host = match response.url().host_str() {
        Some(host) => host,
        None => return false,
    };
    let path = response.url().path();
    CAPTCHA_HOSTS.iter().any(|candidate| {
        match candidate.split_once('/') {
            Some((h, p)) => host == h && path.starts_with(&format!("/{p}")),
            None => host == *candidate,
        }
    })
}

/// CDN bot challenges answer 403/503 with the CDN's own server header.
fn is_cdn_challenge(response: &HttpResponse) -> bool {
    if !matches!(response.status(), 403 | 503) {
        return false;
    }
    response
        .header("server")
        .map(|server| {
            let server = server.to_lowercase();
            server.contains("cloudflare") || server.contains("ddos-guard")
        })
        .unwrap_or(false)
}

fn retry_after_seconds(response: &HttpResponse) -> Option<u64> {
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;
    use url::Url;

    fn response(status: u16, url: &str, headers: &[(&str, &str)]) -> HttpResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                reqwest::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        HttpResponse::new(
            StatusCode::from_u16(status).unwrap(),
            map,
            Url::parse(url).unwrap(),
            0,
            Vec::new(),
        )
    }

    #[test]
    fn test_success_is_unclassified() {
        let resp = response(200, "https://example.com/", &[]);
        assert!(classify_response(&resp).is_none());
    }

    #[test]
    fn test_access_denied() {
        let resp = response(403, "https://example.com/", &[]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::AccessDenied { status: 403 })
        );
        let resp = response(402, "https://example.com/", &[]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::AccessDenied { status: 402 })
        );
    }

    #[test]
    fn test_rate_limited_with_retry_after() {
        let resp = response(429, "https://example.com/", &[("retry-after", "120")]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::TooManyRequests {
                status: 429,
                retry_after: Some(120),
            })
        );
    }

    #[test]
    fn test_rate_limited_without_retry_after() {
        let resp = response(429, "https://example.com/", &[]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::TooManyRequests {
                status: 429,
                retry_after: None,
            })
        );
    }

    #[test]
    fn test_rate_limited_http_date_retry_after_ignored() {
        let resp = response(
            429,
            "https://example.com/",
            &[("retry-after", "Wed, 21 Oct 2026 07:28:00 GMT")],
        );
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::TooManyRequests {
                status: 429,
                retry_after: None,
            })
        );
    }

    #[test]
    fn test_cloudflare_challenge() {
        let resp = response(503, "https://example.com/", &[("server", "cloudflare")]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::Captcha { status: 503 })
        );
    }

    #[test]
    fn test_cloudflare_on_other_status_is_generic() {
        let resp = response(500, "https://example.com/", &[("server", "cloudflare")]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::HttpStatus { status: 500 })
        );
    }

    #[test]
    fn test_google_sorry_redirect_is_captcha() {
        let resp = response(200, "https://sorry.google.com/index", &[]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::Captcha { status: 200 })
        );
        let resp = response(200, "https://www.google.com/sorry/index", &[]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::Captcha { status: 200 })
        );
    }

    #[test]
    fn test_generic_server_error() {
        let resp = response(500, "https://example.com/", &[]);
        assert_eq!(
            classify_response(&resp),
            Some(ClassifiedError::HttpStatus { status: 500 })
        );
    }
}
