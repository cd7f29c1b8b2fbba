//! Request options and descriptors.

use std::time::Duration;

use reqwest::Method;

/// Basic authentication credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

/// Request body payload.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// Raw bytes, sent as-is.
    Raw(Vec<u8>),
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
    /// JSON payload.
    Json(serde_json::Value),
}

/// Per-request options. Immutable once submitted.
///
/// Network-level settings (verify, redirect limit) can be overridden here for
/// a single call; unset fields fall back to the owning network's defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub auth: Option<BasicAuth>,
    pub body: RequestBody,
    /// Explicit per-call timeout; combined with the thread budget by the
    /// call context.
    pub timeout: Option<Duration>,
    /// Per-request certificate verification override.
    pub verify: Option<bool>,
    pub max_redirects: Option<usize>,
    pub follow_redirects: Option<bool>,
    /// Set to `false` to receive error-status responses instead of a
    /// classified error.
    pub raise_for_httperror: Option<bool>,
}

impl RequestOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a cookie.
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Sets basic authentication credentials.
    pub fn with_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password,
        });
        self
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Sets an explicit per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides certificate verification for this call.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = Some(verify);
        self
    }

    /// Overrides the redirect limit for this call.
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    /// Overrides redirect following for this call.
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    /// Enables or disables classified error raising for this call.
    pub fn with_raise_for_httperror(mut self, raise: bool) -> Self {
        self.raise_for_httperror = Some(raise);
        self
    }
}

/// One request of a [`multi_requests`](crate::CallContext::multi_requests)
/// batch.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub options: RequestOptions,
}

impl RequestDescriptor {
    /// Creates a descriptor with default options.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            options: RequestOptions::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn options(url: impl Into<String>) -> Self {
        Self::new(Method::OPTIONS, url)
    }

    /// Replaces the request options.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = RequestOptions::new();
        assert!(options.headers.is_empty());
        assert!(options.cookies.is_empty());
        assert!(options.auth.is_none());
        assert!(matches!(options.body, RequestBody::Empty));
        assert!(options.timeout.is_none());
        assert!(options.verify.is_none());
        assert!(options.raise_for_httperror.is_none());
    }

    #[test]
    fn test_options_builders() {
        let options = RequestOptions::new()
            .with_header("User-Agent", "test")
            .with_cookie("session", "abc")
            .with_auth("user", Some("pass".to_string()))
            .with_timeout(Duration::from_secs(5))
            .with_verify(false)
            .with_max_redirects(3)
            .with_follow_redirects(true)
            .with_raise_for_httperror(false);
        assert_eq!(options.headers, vec![("User-Agent".to_string(), "test".to_string())]);
        assert_eq!(options.cookies.len(), 1);
        assert_eq!(options.auth.as_ref().unwrap().username, "user");
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.verify, Some(false));
        assert_eq!(options.max_redirects, Some(3));
        assert_eq!(options.follow_redirects, Some(true));
        assert_eq!(options.raise_for_httperror, Some(false));
    }

    #[test]
    fn test_options_body_form() {
        let options = RequestOptions::new().with_body(RequestBody::Form(vec![(
            "q".to_string(),
            "rust".to_string(),
        )]));
        match options.body {
            RequestBody::Form(fields) => assert_eq!(fields.len(), 1),
            _ => panic!("Expected Form body"),
        }
    }

    #[test]
    fn test_descriptor_constructors() {
        assert_eq!(RequestDescriptor::get("https://a/").method, Method::GET);
        assert_eq!(RequestDescriptor::head("https://a/").method, Method::HEAD);
        assert_eq!(RequestDescriptor::post("https://a/").method, Method::POST);
        assert_eq!(RequestDescriptor::put("https://a/").method, Method::PUT);
        assert_eq!(RequestDescriptor::patch("https://a/").method, Method::PATCH);
        assert_eq!(RequestDescriptor::delete("https://a/").method, Method::DELETE);
        assert_eq!(RequestDescriptor::options("https://a/").method, Method::OPTIONS);
    }

    #[test]
    fn test_descriptor_with_options() {
        let descriptor = RequestDescriptor::get("https://example.com/")
            .with_options(RequestOptions::new().with_timeout(Duration::from_secs(1)));
        assert_eq!(descriptor.url, "https://example.com/");
        assert_eq!(descriptor.options.timeout, Some(Duration::from_secs(1)));
    }
}
