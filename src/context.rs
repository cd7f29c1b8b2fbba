//! Per-call-thread bridge onto the I/O loop.
//!
//! A [`CallContext`] carries the state one calling thread needs for a batch
//! of requests: the network it is bound to, the shared deadline its budget
//! counts against, and the time it has spent waiting on HTTP so far. All
//! waiting happens here; the context submits work to the loop and blocks on
//! completions with the remaining budget as the deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use tracing::debug;

use crate::network::Network;
use crate::request::{RequestDescriptor, RequestOptions};
use crate::response::HttpResponse;
use crate::runtime::Completion;
use crate::{HttpError, Result};

/// Fallback timeout for requests without an explicit one and no budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace added on top of the nominal timeout so a request that is about to
/// finish on the wire is not cut off by the local clock.
const TIMEOUT_OVERHEAD: Duration = Duration::from_millis(200);

/// Outcome slot of one entry of a parallel batch.
enum Wait {
    Expired,
    Failed(HttpError),
    Pending(Completion<Result<HttpResponse>>, Instant),
}

/// Request state of one calling thread.
pub struct CallContext {
    network: Arc<Network>,
    start_time: Instant,
    budget: Option<Duration>,
    total_time: Duration,
}

impl CallContext {
    /// Creates a context bound to `network`, with no budget and the clock
    /// starting now.
    pub fn new(network: Arc<Network>) -> Self {
        Self {
            network,
            start_time: Instant::now(),
            budget: None,
            total_time: Duration::ZERO,
        }
    }

    /// Sets the shared budget all requests of this context count against.
    ///
    /// `start` backdates the clock, for callers that did setup work before
    /// creating the context.
    pub fn set_timeout(&mut self, budget: Option<Duration>, start: Option<Instant>) {
        self.budget = budget;
        self.start_time = start.unwrap_or_else(Instant::now);
    }

    /// Resets the HTTP time counter.
    pub fn reset_time(&mut self) {
        self.total_time = Duration::ZERO;
    }

    /// Total wall time spent waiting on HTTP in this context.
    pub fn http_time(&self) -> Duration {
        self.total_time
    }

    /// The network this context sends through.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Time left for a request, or `None` when the budget is spent.
    ///
    /// The tighter of the per-request timeout and the shared budget wins;
    /// the elapsed time since the context clock started is subtracted and a
    /// small overhead is granted.
    fn remaining_timeout(&self, explicit: Option<Duration>) -> Option<Duration> {
        let base = match (explicit, self.budget) {
            (Some(explicit), Some(budget)) => explicit.min(budget),
            (Some(explicit), None) => explicit,
            (None, Some(budget)) => budget,
            (None, None) => DEFAULT_TIMEOUT,
        };
        (base + TIMEOUT_OVERHEAD)
            .checked_sub(self.start_time.elapsed())
            .filter(|remaining| !remaining.is_zero())
    }

    /// Sends one request, retrying over the network's rotation.
    pub fn request(
        &mut self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.send(false, method, url, options)
    }

    /// Like [`CallContext::request`], but the body comes back as an open
    /// [`ByteStream`](crate::ByteStream) instead of a buffer.
    pub fn stream(
        &mut self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.send(true, method, url, options)
    }

    fn send(
        &mut self,
        stream: bool,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let call_start = Instant::now();
        let result = self.send_inner(stream, method, url, options);
        self.total_time += call_start.elapsed();
        result
    }

    /// The retry loop. Every attempt draws a fresh client from the rotation
    /// and recomputes the remaining budget. Soft retries hand the buffered
    /// response back once attempts run out; hard transport errors surface
    /// as-is.
    fn send_inner(
        &mut self,
        stream: bool,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let mut retries = self.network.retries();
        loop {
            let timeout = self
                .remaining_timeout(options.timeout)
                .ok_or(HttpError::Timeout)?;
            let client = self.network.get_http_client()?;
            let outcome = client.send(
                stream,
                method.clone(),
                url.to_string(),
                Some(timeout),
                options.clone(),
            );
            match outcome {
                Ok(response) => return Ok(response),
                Err(HttpError::SoftRetry(response)) => {
                    if retries == 0 {
                        return Ok(*response);
                    }
                    debug!(url, status = response.status(), retries, "soft retry");
                    retries -= 1;
                }
                Err(error) if error.is_retryable() => {
                    if retries == 0 {
                        return Err(error);
                    }
                    debug!(url, %error, retries, "retrying after transport error");
                    retries -= 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Sends a batch in parallel on the loop and waits for all of it.
    ///
    /// Every entry gets a result at its own position; one slow or failing
    /// entry never hides the others. Entries are all submitted before any
    /// waiting starts, so the batch overlaps on the wire. Batch entries are
    /// not retried.
    pub fn multi_requests(
        &mut self,
        requests: Vec<RequestDescriptor>,
    ) -> Vec<Result<HttpResponse>> {
        let call_start = Instant::now();
        let mut waits = Vec::with_capacity(requests.len());
        for descriptor in requests {
            let timeout = match self.remaining_timeout(descriptor.options.timeout) {
                Some(timeout) => timeout,
                None => {
                    waits.push(Wait::Expired);
                    continue;
                }
            };
            match self.network.get_http_client() {
                Ok(client) => {
                    let completion = client.submit(
                        false,
                        descriptor.method,
                        descriptor.url,
                        Some(timeout),
                        descriptor.options,
                    );
                    waits.push(Wait::Pending(completion, Instant::now() + timeout));
                }
                Err(error) => waits.push(Wait::Failed(error)),
            }
        }
        let results = waits
            .into_iter()
            .map(|wait| match wait {
                Wait::Expired => Err(HttpError::Timeout),
                Wait::Failed(error) => Err(error),
                Wait::Pending(completion, deadline) => {
                    completion.wait_deadline(deadline).and_then(|inner| inner)
                }
            })
            .collect();
        self.total_time += call_start.elapsed();
        results
    }

    /// GET with redirect following on by default.
    pub fn get(&mut self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::GET, url, default_follow(options, true))
    }

    /// OPTIONS with redirect following on by default.
    pub fn options_request(&mut self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::OPTIONS, url, default_follow(options, true))
    }

    /// HEAD with redirect following off by default.
    pub fn head(&mut self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::HEAD, url, default_follow(options, false))
    }

    pub fn post(&mut self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::POST, url, options)
    }

    pub fn put(&mut self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::PUT, url, options)
    }

    pub fn patch(&mut self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::PATCH, url, options)
    }

    pub fn delete(&mut self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.request(Method::DELETE, url, options)
    }
}

fn default_follow(mut options: RequestOptions, follow: bool) -> RequestOptions {
    if options.follow_redirects.is_none() {
        options.follow_redirects = Some(follow);
    }
    options
}
