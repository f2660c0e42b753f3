//! Async-to-sync bridge
//!
//! Blocking callers hand futures to one long-lived background thread that
//! owns a tokio event loop, then wait on a response channel with a hard
//! timeout. The thread starts on first use and lives for the rest of the
//! process; every transport call in the process runs on it.

use crate::Result;
use crate::error::ToolClientError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{OnceLock, mpsc};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{debug, error, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to the background event loop
pub struct AsyncBridge {
    name: String,
    /// Job queue into the loop thread; initialized once under the OnceLock's lock
    jobs: OnceLock<std::result::Result<UnboundedSender<Job>, String>>,
}

impl AsyncBridge {
    /// Bridge that starts its loop thread lazily on first submission
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: OnceLock::new(),
        }
    }

    /// The process-wide bridge
    pub fn global() -> &'static AsyncBridge {
        static GLOBAL: OnceLock<AsyncBridge> = OnceLock::new();
        GLOBAL.get_or_init(|| AsyncBridge::new("toolrelay-bridge"))
    }

    fn sender(&self) -> Result<&UnboundedSender<Job>> {
        self.jobs
            .get_or_init(|| start_loop(&self.name))
            .as_ref()
            .map_err(|e| ToolClientError::Bridge(e.clone()))
    }

    /// Run `future` on the loop and block until it completes or `timeout`
    /// elapses
    ///
    /// On timeout the task is abandoned, not cancelled: it keeps running on
    /// the loop until it finishes or hits its own transport timeout.
    pub fn run_with_timeout<F, T>(&self, future: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);

        let job: Job = Box::pin(async move {
            let result = future.await;
            // The caller may have stopped waiting
            let _ = tx.send(result);
        });

        self.sender()?
            .send(job)
            .map_err(|_| ToolClientError::Bridge("Event loop thread has stopped".to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("Bridged call abandoned after {:?}", timeout);
                Err(ToolClientError::Timeout(timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ToolClientError::Bridge(
                "Bridged task dropped without a result".to_string(),
            )),
        }
    }
}

/// Spawn the loop thread and return its job queue
fn start_loop(name: &str) -> std::result::Result<UnboundedSender<Job>, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .thread_name(name)
        .build()
        .map_err(|e| format!("Failed to build event loop: {e}"))?;

    let (tx, mut rx) = unbounded_channel::<Job>();

    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            debug!("Event loop thread started");
            runtime.block_on(async move {
                while let Some(job) = rx.recv().await {
                    tokio::spawn(job);
                }
            });
            error!("Event loop thread exited");
        })
        .map_err(|e| format!("Failed to spawn event loop thread: {e}"))?;

    Ok(tx)
}
