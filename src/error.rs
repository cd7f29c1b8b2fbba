//! Error types for the outbound request layer.

use std::error::Error as StdError;

use thiserror::Error;

use crate::response::HttpResponse;

/// Result type alias for network operations.
pub type Result<T> = std::result::Result<T, HttpError>;

/// Errors that can occur while issuing an outbound request.
#[derive(Error, Debug)]
pub enum HttpError {
    /// DNS resolution, TCP connect or TLS handshake failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote endpoint broke the HTTP exchange mid-stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The redirect chain exceeded the configured limit.
    #[error("too many redirects ({count}) for {url}")]
    TooManyRedirects { url: String, count: usize },

    /// Proxy handshake, authentication or connect failure.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// The response status matched the network's soft-retry policy.
    ///
    /// Carries the buffered response so the caller can hand it back once
    /// retries are exhausted. Never surfaced to provider adapters.
    #[error("retryable HTTP status {}", .0.status())]
    SoftRetry(Box<HttpResponse>),

    /// An error status classified into an application-level kind.
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    /// The local deadline expired while waiting on the I/O loop.
    ///
    /// Distinct from a remote-reported timeout, which surfaces as
    /// [`HttpError::Transport`].
    #[error("request deadline exhausted")]
    Timeout,

    /// Plain HTTP is disabled for this network.
    #[error("HTTP protocol is disabled: {0}")]
    UnsupportedProtocol(String),

    /// Invalid address/proxy specification or Tor verification failure.
    #[error("network configuration error: {0}")]
    Configuration(String),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Application-level classification of HTTP error statuses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedError {
    /// The upstream refused to serve the request (402/403).
    #[error("access denied by upstream (status {status})")]
    AccessDenied { status: u16 },

    /// The upstream answered with a CAPTCHA challenge.
    #[error("CAPTCHA challenge from upstream (status {status})")]
    Captcha { status: u16 },

    /// The upstream is rate limiting us (429).
    #[error("rate limited by upstream (status {status})")]
    TooManyRequests {
        status: u16,
        /// Parsed `Retry-After` header, in seconds, when present.
        retry_after: Option<u64>,
    },

    /// Any other 4xx/5xx status.
    #[error("HTTP error status {status}")]
    HttpStatus { status: u16 },
}

impl ClassifiedError {
    /// Returns the HTTP status that triggered the classification.
    pub fn status(&self) -> u16 {
        match self {
            Self::AccessDenied { status }
            | Self::Captcha { status }
            | Self::TooManyRequests { status, .. }
            | Self::HttpStatus { status } => *status,
        }
    }
}

impl HttpError {
    /// Whether the error is worth retrying at the transport level.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpError::Transport(_) | HttpError::Protocol(_) | HttpError::Proxy(_)
        )
    }

    /// Maps a reqwest error onto the transport/protocol/proxy taxonomy.
    pub(crate) fn from_reqwest(error: reqwest::Error) -> HttpError {
        let detail = describe(&error);
        let lowered = detail.to_lowercase();
        if error.is_builder() {
            return HttpError::Configuration(detail);
        }
        if error.is_connect() {
            if lowered.contains("proxy") || lowered.contains("socks") {
                return HttpError::Proxy(detail);
            }
            return HttpError::Transport(detail);
        }
        // Remote-reported timeouts stay on the retryable transport axis.
        if error.is_timeout() {
            return HttpError::Transport(detail);
        }
        if error.is_body() || error.is_decode() {
            return HttpError::Protocol(detail);
        }
        if is_disconnect(&lowered) {
            return HttpError::Protocol(detail);
        }
        HttpError::Transport(detail)
    }
}

/// Mid-exchange disconnects that warrant a one-shot reconnect.
fn is_disconnect(detail: &str) -> bool {
    detail.contains("connection closed")
        || detail.contains("connection reset")
        || detail.contains("incompletemessage")
        || detail.contains("incomplete message")
        || detail.contains("goaway")
        || detail.contains("broken pipe")
}

/// Renders an error with its full source chain.
fn describe(error: &reqwest::Error) -> String {
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        detail.push_str(": ");
        detail.push_str(&inner.to_string());
        source = inner.source();
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_transport() {
        let err = HttpError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "transport error: connection refused");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = HttpError::Timeout;
        assert_eq!(err.to_string(), "request deadline exhausted");
    }

    #[test]
    fn test_error_display_unsupported_protocol() {
        let err = HttpError::UnsupportedProtocol("http://example.com/".to_string());
        assert_eq!(
            err.to_string(),
            "HTTP protocol is disabled: http://example.com/"
        );
    }

    #[test]
    fn test_error_display_too_many_redirects() {
        let err = HttpError::TooManyRedirects {
            url: "https://example.com/".to_string(),
            count: 31,
        };
        assert_eq!(
            err.to_string(),
            "too many redirects (31) for https://example.com/"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display_configuration() {
        let err = HttpError::Configuration("not using Tor".to_string());
        assert_eq!(err.to_string(), "network configuration error: not using Tor");
    }

    #[test]
    fn test_classified_error_status() {
        let err = ClassifiedError::AccessDenied { status: 403 };
        assert_eq!(err.status(), 403);
        let err = ClassifiedError::TooManyRequests {
            status: 429,
            retry_after: Some(60),
        };
        assert_eq!(err.status(), 429);
    }

    #[test]
    fn test_classified_error_display() {
        let err = ClassifiedError::Captcha { status: 503 };
        assert_eq!(
            err.to_string(),
            "CAPTCHA challenge from upstream (status 503)"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(HttpError::Transport("x".into()).is_retryable());
        assert!(HttpError::Protocol("x".into()).is_retryable());
        assert!(HttpError::Proxy("x".into()).is_retryable());
        assert!(!HttpError::Timeout.is_retryable());
        assert!(!HttpError::Configuration("x".into()).is_retryable());
        assert!(!HttpError::Classified(ClassifiedError::HttpStatus { status: 500 }).is_retryable());
    }

    #[test]
    fn test_is_disconnect() {
        assert!(is_disconnect("error: connection closed before message completed"));
        assert!(is_disconnect("hyper: incompletemessage"));
        assert!(!is_disconnect("dns error: no such host"));
    }

    #[test]
    fn test_classified_error_from() {
        let err: HttpError = ClassifiedError::HttpStatus { status: 500 }.into();
        assert!(matches!(err, HttpError::Classified(_)));
    }
}
