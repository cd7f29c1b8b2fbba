//! HTTP client layers.
//!
//! [`OneClient`] owns one connection pool for a fixed (local address, proxy)
//! slot and runs the actual exchange on the I/O loop: manual redirect
//! following, a one-shot reconnect on mid-stream disconnects, and the
//! streaming producer. [`HttpClient`] caches one [`OneClient`] per effective
//! certificate-verification setting. [`SoftErrorClient`] adds status
//! classification and soft-retry marking on top. All layers meet behind the
//! [`HttpSend`] trait, which is what networks hand out and call contexts
//! consume.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT_ENCODING, COOKIE, LOCATION};
use reqwest::{Method, Proxy, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::classify::classify_response;
use crate::request::{RequestBody, RequestOptions};
use crate::response::{ByteStream, HttpResponse, StreamEvent};
use crate::runtime::{Completion, LoopHandle};
use crate::tls::{TlsContextCache, TlsKey};
use crate::{HttpError, Result};

/// Boxed response future, ready to be scheduled onto the I/O loop.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + 'static>>;

/// Object-safe seam between networks and the client stack.
///
/// `response_future` builds the whole exchange as a future; the provided
/// [`HttpSend::submit`] schedules it onto the loop and hands back the
/// completion the calling thread blocks on.
pub trait HttpSend: Send + Sync {
    /// Builds the exchange future for one request.
    fn response_future(
        &self,
        stream: bool,
        method: Method,
        url: String,
        timeout: Option<Duration>,
        options: RequestOptions,
    ) -> ResponseFuture;

    /// Handle of the loop this client runs on.
    fn loop_handle(&self) -> &LoopHandle;

    /// Marks the client closed; subsequent submissions fail.
    fn close(&self);

    /// Whether [`HttpSend::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Schedules the exchange onto the I/O loop.
    fn submit(
        &self,
        stream: bool,
        method: Method,
        url: String,
        timeout: Option<Duration>,
        options: RequestOptions,
    ) -> Completion<Result<HttpResponse>> {
        self.loop_handle()
            .submit(self.response_future(stream, method, url, timeout, options))
    }

    /// Sends the request and blocks the calling thread until the outcome
    /// arrives or `timeout` elapses locally.
    fn send(
        &self,
        stream: bool,
        method: Method,
        url: String,
        timeout: Option<Duration>,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let wait = timeout.unwrap_or(crate::context::DEFAULT_TIMEOUT);
        self.submit(stream, method, url, timeout, options)
            .wait_timeout(wait)?
    }
}

/// Transport kind of a configured proxy URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProxyKind {
    Http,
    Https,
    Socks4,
    Socks5,
    Socks5h,
}

impl ProxyKind {
    pub(crate) fn from_url(url: &str) -> Result<ProxyKind> {
        let scheme = url.split("://").next().unwrap_or("");
        match scheme {
            "http" => Ok(ProxyKind::Http),
            "https" => Ok(ProxyKind::Https),
            "socks4" => Ok(ProxyKind::Socks4),
            "socks5" => Ok(ProxyKind::Socks5),
            "socks5h" => Ok(ProxyKind::Socks5h),
            _ => Err(HttpError::Configuration(format!(
                "unsupported proxy scheme: {url}"
            ))),
        }
    }

    /// Whether hostname resolution happens on the proxy side.
    ///
    /// SOCKS4 and plain SOCKS5 resolve on the client, which leaks DNS
    /// queries past the proxy.
    pub(crate) fn remote_dns(self) -> bool {
        matches!(self, ProxyKind::Http | ProxyKind::Https | ProxyKind::Socks5h)
    }
}

/// Everything needed to build one connection pool.
#[derive(Debug, Clone)]
pub(crate) struct ClientSettings {
    pub enable_http: bool,
    pub verify: bool,
    pub enable_http2: bool,
    pub max_keepalive_connections: usize,
    pub keepalive_expiry: Option<f64>,
    /// `(pattern, proxy URL)` rules, pattern-normalized.
    pub proxies: Vec<(String, String)>,
    pub local_address: Option<IpAddr>,
    pub max_redirects: usize,
    pub follow_redirects: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            enable_http: false,
            verify: true,
            enable_http2: true,
            max_keepalive_connections: 20,
            keepalive_expiry: Some(5.0),
            proxies: Vec::new(),
            local_address: None,
            max_redirects: 30,
            follow_redirects: false,
        }
    }
}

struct ClientCore {
    settings: ClientSettings,
    loop_handle: LoopHandle,
    tls: Arc<TlsContextCache>,
    client: Mutex<reqwest::Client>,
    closed: AtomicBool,
}

impl ClientCore {
    fn current_client(&self) -> reqwest::Client {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the pool after a mid-stream disconnect.
    fn reconnect(&self) -> Result<()> {
        let fresh = build_client(&self.settings, &self.tls)?;
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }
}

/// One connection pool bound to a fixed slot configuration.
pub(crate) struct OneClient {
    core: Arc<ClientCore>,
}

impl OneClient {
    pub(crate) fn new(
        settings: ClientSettings,
        loop_handle: LoopHandle,
        tls: Arc<TlsContextCache>,
    ) -> Result<Self> {
        let client = build_client(&settings, &tls)?;
        Ok(Self {
            core: Arc::new(ClientCore {
                settings,
                loop_handle,
                tls,
                client: Mutex::new(client),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

impl HttpSend for OneClient {
    fn response_future(
        &self,
        stream: bool,
        method: Method,
        url: String,
        timeout: Option<Duration>,
        options: RequestOptions,
    ) -> ResponseFuture {
        if self.is_closed() {
            return Box::pin(async {
                Err(HttpError::Configuration("client is closed".to_string()))
            });
        }
        let core = Arc::clone(&self.core);
        Box::pin(perform(core, stream, method, url, timeout, options))
    }

    fn loop_handle(&self) -> &LoopHandle {
        &self.core.loop_handle
    }

    fn close(&self) {
        self.core.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }
}

fn build_client(settings: &ClientSettings, tls: &TlsContextCache) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .referer(false)
        .pool_max_idle_per_host(settings.max_keepalive_connections);
    if let Some(expiry) = settings.keepalive_expiry {
        builder = builder.pool_idle_timeout(Duration::from_secs_f64(expiry));
    }
    if !settings.enable_http2 {
        builder = builder.http1_only();
    }
    if let Some(address) = settings.local_address {
        builder = builder.local_address(address);
    }
    if settings.verify {
        let key = TlsKey {
            proxy_url: settings.proxies.first().map(|(_, url)| url.clone()),
            http2: settings.enable_http2,
        };
        builder = builder.use_preconfigured_tls((*tls.get(key)?).clone());
    } else {
        builder = builder.danger_accept_invalid_certs(true);
    }
    for (pattern, proxy_url) in &settings.proxies {
        if pattern == "http://" && !settings.enable_http {
            continue;
        }
        builder = builder.proxy(proxy_for_pattern(pattern, proxy_url)?);
    }
    builder.build().map_err(HttpError::from_reqwest)
}

/// Maps a requests-style URL pattern onto a reqwest proxy rule.
fn proxy_for_pattern(pattern: &str, proxy_url: &str) -> Result<Proxy> {
    let proxy = match pattern {
        "all://" => Proxy::all(proxy_url),
        "http://" => Proxy::http(proxy_url),
        "https://" => Proxy::https(proxy_url),
        _ => {
            let (scheme, host) = pattern
                .split_once("://")
                .ok_or_else(|| {
                    HttpError::Configuration(format!("invalid proxy pattern: {pattern}"))
                })?;
            let scheme = scheme.to_string();
            let host = host.trim_end_matches('/').to_string();
            let target = proxy_url.to_string();
            return Ok(Proxy::custom(move |url: &Url| {
                let scheme_matches = scheme == "all" || url.scheme() == scheme;
                let host_matches = url.host_str() == Some(host.as_str());
                (scheme_matches && host_matches).then(|| target.clone())
            }));
        }
    };
    proxy.map_err(HttpError::from_reqwest)
}

/// Runs one exchange on the loop, reconnecting the pool once if the server
/// dropped the connection mid-request.
async fn perform(
    core: Arc<ClientCore>,
    stream: bool,
    method: Method,
    url: String,
    timeout: Option<Duration>,
    options: RequestOptions,
) -> Result<HttpResponse> {
    match exchange(&core, stream, &method, &url, timeout, &options).await {
        Err(HttpError::Protocol(detail)) => {
            warn!(url, %detail, "connection dropped mid-request, reconnecting");
            core.reconnect()?;
            exchange(&core, stream, &method, &url, timeout, &options).await
        }
        other => other,
    }
}

async fn exchange(
    core: &ClientCore,
    stream: bool,
    method: &Method,
    url: &str,
    timeout: Option<Duration>,
    options: &RequestOptions,
) -> Result<HttpResponse> {
    let client = core.current_client();
    let settings = &core.settings;
    let follow = options.follow_redirects.unwrap_or(settings.follow_redirects);
    let limit = options.max_redirects.unwrap_or(settings.max_redirects);

    let mut current_url: Url = url.parse()?;
    let mut current_method = method.clone();
    let mut history = 0usize;

    loop {
        if current_url.scheme() == "http" && !settings.enable_http {
            return Err(HttpError::UnsupportedProtocol(current_url.to_string()));
        }

        // The body is only replayed while the method survives redirects.
        let with_body = current_method == *method;
        let request = build_request(
            &client,
            &current_method,
            &current_url,
            timeout,
            options,
            with_body,
            stream,
        );
        let response = request.send().await.map_err(HttpError::from_reqwest)?;

        let status = response.status();
        if follow && status.is_redirection() {
            if let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                history += 1;
                if history > limit {
                    return Err(HttpError::TooManyRedirects {
                        url: url.to_string(),
                        count: history,
                    });
                }
                let next_url = current_url.join(location)?;
                current_method = redirected_method(status, &current_method);
                debug!(
                    from = %current_url,
                    to = %next_url,
                    status = status.as_u16(),
                    "following redirect"
                );
                current_url = next_url;
                continue;
            }
        }

        let headers = response.headers().clone();
        let final_url = response.url().clone();
        if stream {
            return Ok(HttpResponse::with_stream(
                status,
                headers,
                final_url,
                history,
                spawn_stream_producer(response),
            ));
        }
        let body = response
            .bytes()
            .await
            .map_err(HttpError::from_reqwest)?
            .to_vec();
        return Ok(HttpResponse::new(status, headers, final_url, history, body));
    }
}

/// 303 always downgrades to GET; 301/302 downgrade everything but HEAD;
/// 307/308 keep the method.
fn redirected_method(status: StatusCode, method: &Method) -> Method {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
            if *method == Method::HEAD {
                Method::HEAD
            } else {
                Method::GET
            }
        }
        _ => method.clone(),
    }
}

fn build_request(
    client: &reqwest::Client,
    method: &Method,
    url: &Url,
    timeout: Option<Duration>,
    options: &RequestOptions,
    with_body: bool,
    stream: bool,
) -> reqwest::RequestBuilder {
    let mut request = client.request(method.clone(), url.clone());
    for (name, value) in &options.headers {
        request = request.header(name, value);
    }
    if !options.cookies.is_empty() {
        let cookie = options
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        request = request.header(COOKIE, cookie);
    }
    if stream {
        // Streamed bodies are handed out raw, chunk by chunk.
        request = request.header(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
    if let Some(auth) = &options.auth {
        request = request.basic_auth(&auth.username, auth.password.as_deref());
    }
    if with_body {
        request = match &options.body {
            RequestBody::Empty => request,
            RequestBody::Raw(bytes) => request.body(bytes.clone()),
            RequestBody::Form(fields) => request.form(fields),
            RequestBody::Json(value) => request.json(value),
        };
    }
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    request
}

/// Forwards body chunks to the caller-side stream until the body ends, the
/// transfer fails, or the consumer drops the stream.
fn spawn_stream_producer(response: reqwest::Response) -> ByteStream {
    use futures::StreamExt;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut chunks = response.bytes_stream();
        while let Some(item) = chunks.next().await {
            let sent = match item {
                Ok(chunk) => tx.send(StreamEvent::Chunk(chunk.to_vec())),
                Err(error) => {
                    let _ = tx.send(StreamEvent::Error(HttpError::from_reqwest(error)));
                    break;
                }
            };
            if sent.is_err() {
                // Consumer dropped the stream.
                break;
            }
        }
    });
    ByteStream::new(rx)
}

/// Client with per-request certificate-verification overrides.
///
/// A verify override needs its own pool, so pools are cached by the
/// effective verify value.
pub(crate) struct HttpClient {
    settings: ClientSettings,
    loop_handle: LoopHandle,
    tls: Arc<TlsContextCache>,
    clients: Mutex<HashMap<bool, Arc<OneClient>>>,
    closed: AtomicBool,
}

impl HttpClient {
    pub(crate) fn new(
        settings: ClientSettings,
        loop_handle: LoopHandle,
        tls: Arc<TlsContextCache>,
    ) -> Result<Self> {
        let client = Self {
            settings,
            loop_handle,
            tls,
            clients: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        // Fail configuration errors at build time, not on first request.
        client.client_for(None)?;
        Ok(client)
    }

    fn client_for(&self, verify: Option<bool>) -> Result<Arc<OneClient>> {
        let verify = verify.unwrap_or(self.settings.verify);
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&verify) {
            return Ok(Arc::clone(client));
        }
        let mut settings = self.settings.clone();
        settings.verify = verify;
        let client = Arc::new(OneClient::new(
            settings,
            self.loop_handle.clone(),
            Arc::clone(&self.tls),
        )?);
        clients.insert(verify, Arc::clone(&client));
        Ok(client)
    }
}

impl HttpSend for HttpClient {
    fn response_future(
        &self,
        stream: bool,
        method: Method,
        url: String,
        timeout: Option<Duration>,
        options: RequestOptions,
    ) -> ResponseFuture {
        if self.is_closed() {
            return Box::pin(async {
                Err(HttpError::Configuration("client is closed".to_string()))
            });
        }
        match self.client_for(options.verify) {
            Ok(client) => client.response_future(stream, method, url, timeout, options),
            Err(error) => Box::pin(async move { Err(error) }),
        }
    }

    fn loop_handle(&self) -> &LoopHandle {
        &self.loop_handle
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let clients = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for client in clients.values() {
            client.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Which response statuses mark an otherwise valid exchange as retryable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RetryCondition {
    #[default]
    Never,
    /// Any 4xx/5xx status.
    AllErrors,
    Status(u16),
    Statuses(Vec<u16>),
}

impl RetryCondition {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            RetryCondition::Never => false,
            RetryCondition::AllErrors => status >= 400,
            RetryCondition::Status(wanted) => *wanted == status,
            RetryCondition::Statuses(wanted) => wanted.contains(&status),
        }
    }
}

/// Adds status classification and soft-retry marking on top of
/// [`HttpClient`].
///
/// Unless disabled per request, error statuses become classified errors.
/// Otherwise, statuses matching the retry condition come back as
/// [`HttpError::SoftRetry`] carrying the response, so the retry loop can
/// rotate and try again yet still hand the response back once retries run
/// out.
pub(crate) struct SoftErrorClient {
    inner: HttpClient,
    retry_condition: RetryCondition,
}

impl SoftErrorClient {
    pub(crate) fn new(
        settings: ClientSettings,
        retry_condition: RetryCondition,
        loop_handle: LoopHandle,
        tls: Arc<TlsContextCache>,
    ) -> Result<Self> {
        Ok(Self {
            inner: HttpClient::new(settings, loop_handle, tls)?,
            retry_condition,
        })
    }
}

impl HttpSend for SoftErrorClient {
    fn response_future(
        &self,
        stream: bool,
        method: Method,
        url: String,
        timeout: Option<Duration>,
        options: RequestOptions,
    ) -> ResponseFuture {
        let raise = options.raise_for_httperror.unwrap_or(true);
        let condition = self.retry_condition.clone();
        let inner = self.inner.response_future(stream, method, url, timeout, options);
        Box::pin(async move {
            let response = inner.await?;
            if raise {
                if let Some(classified) = classify_response(&response) {
                    return Err(classified.into());
                }
            }
            if condition.matches(response.status()) {
                return Err(HttpError::SoftRetry(Box::new(response)));
            }
            Ok(response)
        })
    }

    fn loop_handle(&self) -> &LoopHandle {
        self.inner.loop_handle()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
