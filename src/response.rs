//! Response types: buffered responses and pull-based byte streams.

use std::fmt;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use url::Url;

use crate::{HttpError, Result};

/// One event on the loop-to-caller stream channel.
pub(crate) enum StreamEvent {
    Chunk(Vec<u8>),
    Error(HttpError),
}

/// Pull-based sequence of raw body chunks.
///
/// Produced by the I/O loop, drained synchronously by the calling thread.
/// Finite and not restartable. Dropping the stream closes the channel and
/// drains whatever the producer already queued, which guarantees the
/// loop-side task finishes and its pooled connection is released.
pub struct ByteStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ByteStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self { rx }
    }

    /// Closes the stream, draining any pending chunks.
    pub fn close(self) {}
}

impl Iterator for ByteStream {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.blocking_recv() {
            Some(StreamEvent::Chunk(chunk)) => Some(Ok(chunk)),
            Some(StreamEvent::Error(err)) => Some(Err(err)),
            None => None,
        }
    }
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        // Stop the producer, then drain so its task is guaranteed to finish.
        // Blocking is not allowed on the loop itself; there, closing alone
        // stops the producer and the queued chunks are freed with the
        // channel.
        self.rx.close();
        if tokio::runtime::Handle::try_current().is_err() {
            while self.rx.blocking_recv().is_some() {}
        }
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

/// An HTTP response: status, headers, final URL, redirect count and either a
/// buffered body or an open byte stream.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    history: usize,
    body: Vec<u8>,
    stream: Option<ByteStream>,
}

impl HttpResponse {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        url: Url,
        history: usize,
        body: Vec<u8>,
    ) -> Self {
        Self {
            status,
            headers,
            url,
            history,
            body,
            stream: None,
        }
    }

    pub(crate) fn with_stream(
        status: StatusCode,
        headers: HeaderMap,
        url: Url,
        history: usize,
        stream: ByteStream,
    ) -> Self {
        Self {
            status,
            headers,
            url,
            history,
            body: Vec::new(),
            stream: Some(stream),
        }
    }

    /// Numeric HTTP status.
    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    /// Typed HTTP status.
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// `true` for any non-error status.
    pub fn ok(&self) -> bool {
        !(self.status.is_client_error() || self.status.is_server_error())
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of redirects followed to reach the final URL.
    pub fn history(&self) -> usize {
        self.history
    }

    /// Buffered body bytes. Empty for streamed responses.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HttpError::Protocol(format!("invalid JSON body: {e}")))
    }

    /// Takes ownership of the byte stream, if this is a streamed response.
    pub fn take_stream(&mut self) -> Option<ByteStream> {
        self.stream.take()
    }

    /// Whether this response carries an open byte stream.
    pub fn is_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Closes the stream (if any), draining it so the underlying transfer
    /// finishes.
    pub fn close(&mut self) {
        self.stream.take();
    }
}
