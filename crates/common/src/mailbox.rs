//! Single-slot signal channel between a notifying thread and the event loop
//!
//! The writer never blocks: a post into a full mailbox fails immediately and
//! the caller decides what to do with the dropped token. The reader side is
//! polled by the event loop, which waits on [`MailboxReader::readable`] and
//! then takes at most one token per wake.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use std::sync::Arc;
use tokio::sync::Notify;

/// Default number of tokens a mailbox holds before posts start failing
pub const MAILBOX_CAPACITY: usize = 1;

/// Kind of device change carried by a mailbox token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceChange {
    /// A device was attached
    Arrival,
    /// A device was detached
    Removal,
}

impl std::fmt::Display for DeviceChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceChange::Arrival => write!(f, "arrival"),
            DeviceChange::Removal => write!(f, "removal"),
        }
    }
}

/// Write endpoint, owned by exactly one notifying thread
///
/// Dropping the writer closes the mailbox and wakes the reader so it can
/// observe the closure.
#[derive(Debug)]
pub struct MailboxWriter {
    tx: Sender<DeviceChange>,
    readable: Arc<Notify>,
}

impl MailboxWriter {
    /// Post a token without blocking
    ///
    /// Returns [`Error::MailboxFull`](crate::Error::MailboxFull) when the
    /// reader has not drained the previous token yet, and
    /// [`Error::MailboxClosed`](crate::Error::MailboxClosed) when the reader
    /// is gone.
    pub fn try_post(&self, change: DeviceChange) -> crate::Result<()> {
        match self.tx.try_send(change) {
            Ok(()) => {
                self.readable.notify_one();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(crate::Error::MailboxFull),
            Err(TrySendError::Closed(_)) => Err(crate::Error::MailboxClosed),
        }
    }
}

impl Drop for MailboxWriter {
    fn drop(&mut self) {
        self.tx.close();
        self.readable.notify_one();
    }
}

/// Read endpoint, owned by the event loop
#[derive(Debug)]
pub struct MailboxReader {
    rx: Receiver<DeviceChange>,
    readable: Arc<Notify>,
}

impl MailboxReader {
    /// Wait until a token is pending or the writer is gone
    pub async fn readable(&self) {
        loop {
            if !self.rx.is_empty() || self.rx.is_closed() {
                return;
            }
            self.readable.notified().await;
        }
    }

    /// Take one pending token, if any
    ///
    /// Returns [`Error::MailboxClosed`](crate::Error::MailboxClosed) once the
    /// writer is gone and every token has been drained.
    pub fn try_take(&self) -> crate::Result<Option<DeviceChange>> {
        match self.rx.try_recv() {
            Ok(change) => Ok(Some(change)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(crate::Error::MailboxClosed),
        }
    }

    /// Number of tokens waiting to be taken
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Create a mailbox with the default single-slot capacity
pub fn mailbox() -> (MailboxWriter, MailboxReader) {
    mailbox_with_capacity(MAILBOX_CAPACITY)
}

/// Create a mailbox holding up to `capacity` tokens (at least one)
pub fn mailbox_with_capacity(capacity: usize) -> (MailboxWriter, MailboxReader) {
    let (tx, rx) = bounded(capacity.max(1));
    let readable = Arc::new(Notify::new());

    (
        MailboxWriter {
            tx,
            readable: readable.clone(),
        },
        MailboxReader { rx, readable },
    )
}
