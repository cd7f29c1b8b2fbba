//! Dedicated I/O runtime loop and the blocking-caller bridge.
//!
//! One background thread drives a tokio runtime for the whole process; every
//! outbound connection is polled there, never on a calling thread. Callers
//! submit a unit of work through a [`LoopHandle`] and block on the returned
//! [`Completion`] with a deadline. The handoff uses a bounded channel of
//! capacity one, so the runtime side can never block on a slow caller.

use std::future::Future;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime;
use tracing::debug;

use crate::{HttpError, Result};

/// Owns the I/O loop thread. Dropping it (or calling [`RuntimeLoop::shutdown`])
/// stops the loop; submissions arriving afterwards fail fast with a
/// configuration error instead of hanging.
pub struct RuntimeLoop {
    handle: LoopHandle,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Cheaply cloneable handle used to schedule work onto the loop.
#[derive(Clone)]
pub struct LoopHandle {
    inner: runtime::Handle,
}

/// Completion handle for one unit of work submitted to the loop.
///
/// The blocking side of the bridge: the caller waits on it with a timeout or
/// an absolute deadline. After a local expiry the loop-side task keeps
/// running to completion in the background and self-terminates.
pub struct Completion<T> {
    rx: mpsc::Receiver<T>,
}

impl RuntimeLoop {
    /// Starts the loop on a dedicated thread.
    pub fn start() -> Result<Self> {
        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HttpError::Configuration(format!("failed to build I/O runtime: {e}")))?;
        let handle = LoopHandle {
            inner: rt.handle().clone(),
        };
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let thread = thread::Builder::new()
            .name("metanet-io".to_string())
            .spawn(move || {
                debug!("I/O loop started");
                let _ = rt.block_on(shutdown_rx);
                debug!("I/O loop shutting down");
            })
            .map_err(|e| HttpError::Configuration(format!("failed to spawn I/O thread: {e}")))?;
        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Returns a handle for submitting work to the loop.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Stops the loop and waits for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RuntimeLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LoopHandle {
    /// Schedules a future onto the loop and returns its completion handle.
    ///
    /// The result is delivered through a channel the loop side sends into
    /// exactly once, so the send never blocks the runtime.
    pub fn submit<T, F>(&self, future: F) -> Completion<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.inner.spawn(async move {
            let _ = tx.send(future.await);
        });
        Completion { rx }
    }
}

impl<T> Completion<T> {
    /// Blocks the calling thread until the result arrives or `timeout`
    /// elapses.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(HttpError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(HttpError::Configuration(
                "I/O loop is not running".to_string(),
            )),
        }
    }

    /// Blocks until the result arrives or the absolute deadline passes.
    pub fn wait_deadline(self, deadline: Instant) -> Result<T> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.wait_timeout(remaining)
    }
}
