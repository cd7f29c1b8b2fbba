//! Provider adapter: how a search engine describes its requests and how the
//! request layer runs them.
//!
//! A provider fills a [`RequestParams`] with everything one upstream query
//! needs; [`send_provider_request`] turns that into a request on the calling
//! thread's context and applies the provider-level diagnostics (soft
//! redirect limit) on the way back.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method;

use crate::context::CallContext;
use crate::metrics::{ErrorRecord, ErrorRecorder};
use crate::request::{BasicAuth, RequestBody, RequestOptions};
use crate::response::HttpResponse;
use crate::{HttpError, Result};

/// Everything a provider controls about one upstream request.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub data: RequestBody,
    pub cookies: Vec<(String, String)>,
    pub auth: Option<BasicAuth>,
    pub verify: Option<bool>,
    pub max_redirects: Option<usize>,
    /// Redirect count above which a diagnostic is recorded; the response is
    /// still returned.
    pub soft_max_redirects: usize,
    pub allow_redirects: Option<bool>,
    pub raise_for_httperror: bool,
    // Query metadata, filled by the caller for `build_request` to use.
    pub category: String,
    pub page: usize,
    pub safesearch: u8,
    pub time_range: Option<String>,
    pub language: Option<String>,
    pub engine_data: HashMap<String, String>,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            method: Method::GET,
            url: String::new(),
            headers: Vec::new(),
            data: RequestBody::Empty,
            cookies: Vec::new(),
            auth: None,
            verify: None,
            max_redirects: None,
            soft_max_redirects: 0,
            allow_redirects: None,
            raise_for_httperror: true,
            category: String::new(),
            page: 1,
            safesearch: 0,
            time_range: None,
            language: None,
            engine_data: HashMap::new(),
        }
    }
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One result row parsed out of an upstream response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub extra: HashMap<String, String>,
}

/// A search engine adapter.
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Per-query request budget.
    fn timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    fn paging(&self) -> bool {
        false
    }

    fn categories(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fills `params` (URL, method, headers, body) for `query`.
    fn build_request(&self, query: &str, params: &mut RequestParams);

    /// Parses the upstream response into result rows.
    fn parse_response(&self, response: &HttpResponse) -> Result<Vec<ProviderResult>>;
}

fn build_options(params: &RequestParams) -> RequestOptions {
    RequestOptions {
        headers: params.headers.clone(),
        cookies: params.cookies.clone(),
        auth: params.auth.clone(),
        body: params.data.clone(),
        timeout: None,
        verify: params.verify,
        max_redirects: params.max_redirects,
        follow_redirects: params.allow_redirects,
        raise_for_httperror: Some(params.raise_for_httperror),
    }
}

/// Records a diagnostic when a response crossed the provider's soft
/// redirect limit.
fn check_soft_redirects(
    response: &HttpResponse,
    params: &RequestParams,
    engine: &str,
    recorder: &dyn ErrorRecorder,
) {
    if response.history() > params.soft_max_redirects {
        recorder.record(ErrorRecord {
            engine: engine.to_string(),
            message: format!(
                "{} redirects, maximum: {}",
                response.history(),
                params.soft_max_redirects
            ),
            status: Some(response.status()),
            reason: response
                .status_code()
                .canonical_reason()
                .map(str::to_string),
            host: response.url().host_str().map(str::to_string),
            secondary: true,
        });
    }
}

/// Sends one provider request through `ctx`.
///
/// GET requests follow redirects by default, like the context's GET helper.
pub fn send_provider_request(
    ctx: &mut CallContext,
    engine: &str,
    params: &RequestParams,
    recorder: &dyn ErrorRecorder,
) -> Result<HttpResponse> {
    let options = build_options(params);
    let response = if params.method == Method::GET {
        ctx.get(&params.url, options)?
    } else {
        ctx.request(params.method.clone(), &params.url, options)?
    };
    check_soft_redirects(&response, params, engine, recorder);
    Ok(response)
}

/// Runs one query against a provider: build the request, send it with the
/// provider's budget, parse the rows.
pub fn run_search(
    provider: &dyn SearchProvider,
    query: &str,
    ctx: &mut CallContext,
    recorder: &dyn ErrorRecorder,
) -> Result<Vec<ProviderResult>> {
    let mut params = RequestParams::new();
    provider.build_request(query, &mut params);
    if params.url.is_empty() {
        return Err(HttpError::Configuration(format!(
            "provider {} produced no request URL",
            provider.name()
        )));
    }
    ctx.set_timeout(Some(provider.timeout()), None);
    let response = send_provider_request(ctx, provider.name(), &params, recorder)?;
    provider.parse_response(&response)
}
