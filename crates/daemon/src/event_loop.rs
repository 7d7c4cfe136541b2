//! Central event loop
//!
//! A single-threaded tokio runtime driving a `LocalSet`. Everything the
//! daemon reacts to is registered here as a source; callbacks run on the
//! thread that calls [`EventLoop::run`], one wake at a time.
//!
//! Stopping is the daemon-wide cancellation signal: any thread holding a
//! [`StopHandle`] can end `run`, and components observe that single
//! condition instead of being torn down forcibly.

use common::MailboxReader;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tokio::task::{JoinHandle, LocalSet};
use tracing::debug;

pub const LOG_TARGET: &str = module_path!();

/// Identifies a registered source for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// Returned by a source callback to keep or drop the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFlow {
    Keep,
    Remove,
}

#[derive(Debug, Error)]
pub enum EventLoopError {
    #[error("Could not create event loop runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Thread-safe handle that ends [`EventLoop::run`]
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request the loop to stop; safe to call from any thread, any number of times
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            debug!("Event loop stop requested");
        }
    }

    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

pub struct EventLoop {
    local: LocalSet,
    runtime: Runtime,
    sources: HashMap<SourceId, JoinHandle<()>>,
    next_source: u64,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl EventLoop {
    pub fn new() -> Result<Self, EventLoopError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (stop_tx, _stop_rx) = watch::channel(false);

        debug!("Event loop initialized");

        Ok(Self {
            local: LocalSet::new(),
            runtime,
            sources: HashMap::new(),
            next_source: 1,
            stop_tx: Arc::new(stop_tx),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Register a mailbox reader as a source
    ///
    /// `callback` runs once per wake, when the reader has a pending token or
    /// its writer is gone. Returning [`SourceFlow::Remove`] drops the source.
    pub fn register_source<F>(&mut self, reader: MailboxReader, mut callback: F) -> SourceId
    where
        F: FnMut(&MailboxReader) -> SourceFlow + 'static,
    {
        let id = SourceId(self.next_source);
        self.next_source += 1;

        let task = self.local.spawn_local(async move {
            loop {
                reader.readable().await;
                if callback(&reader) == SourceFlow::Remove {
                    debug!("Event source {:?} removed itself", id);
                    break;
                }
            }
        });

        self.sources.insert(id, task);
        debug!("Registered event source {:?}", id);
        id
    }

    /// Remove a source; returns whether it was registered
    pub fn unregister_source(&mut self, id: SourceId) -> bool {
        match self.sources.remove(&id) {
            Some(task) => {
                task.abort();
                debug!("Unregistered event source {:?}", id);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Run until a stop is requested
    ///
    /// Returns immediately if a stop was requested before the call.
    pub fn run(&self) -> Result<(), EventLoopError> {
        let mut stop_rx = self.stop_tx.subscribe();

        debug!("Event loop running");
        self.runtime.block_on(self.local.run_until(async move {
            // The loop owns the sender, so the channel cannot close while waiting
            let _ = stop_rx.wait_for(|stopped| *stopped).await;
        }));
        debug!("Event loop stopped");

        Ok(())
    }
}
