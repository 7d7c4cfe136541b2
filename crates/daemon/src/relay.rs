//! Hotplug notification relay
//!
//! Notifying threads hold a [`NotificationSink`] and post device changes into
//! the mailbox without ever blocking. The event loop owns the matching
//! [`NotificationRelay`], which turns each drained token into one USB rescan.
//!
//! Tokens are not coalesced on the read side: every wake takes exactly one.
//! Because the mailbox holds a single slot, a burst of notifications while
//! the loop is busy collapses into one pending token and therefore one
//! rescan once the loop gets to it.

use crate::event_loop::SourceFlow;
use crate::usb::SharedUsb;
use common::{DeviceChange, MailboxReader, MailboxWriter};
use tracing::{debug, error, warn};

pub const LOG_TARGET: &str = module_path!();

/// Receiver of device change notifications on a notifying thread
pub trait DeviceEventSink: Send + 'static {
    fn device_changed(&self, change: DeviceChange);
}

/// Write side of the relay, handed to exactly one notifying context
#[derive(Debug)]
pub struct NotificationSink {
    writer: MailboxWriter,
}

impl NotificationSink {
    pub fn new(writer: MailboxWriter) -> Self {
        Self { writer }
    }

    /// Post a notification; failures are logged and the event dropped
    pub fn signal(&self, change: DeviceChange) {
        debug!("Received device notification (type: {})", change);

        match self.writer.try_post(change) {
            Ok(()) => {}
            Err(common::Error::MailboxFull) => {
                warn!(
                    "Notification mailbox is full, dropping {} notification",
                    change
                );
            }
            Err(e) => {
                error!("Could not write to notification mailbox: {}", e);
            }
        }
    }
}

impl DeviceEventSink for NotificationSink {
    fn device_changed(&self, change: DeviceChange) {
        self.signal(change);
    }
}

/// Read side of the relay, driven by the event loop
pub struct NotificationRelay {
    usb: SharedUsb,
}

impl NotificationRelay {
    pub fn new(usb: SharedUsb) -> Self {
        Self { usb }
    }

    /// Drain one token and trigger a rescan
    ///
    /// A read error removes the source: no further rescans come from this
    /// mailbox, but the loop keeps running.
    pub fn on_readable(&mut self, reader: &MailboxReader) -> SourceFlow {
        match reader.try_take() {
            Ok(Some(change)) => {
                debug!("Forwarding {} notification to USB subsystem", change);
                if let Err(e) = self.usb.borrow_mut().rescan() {
                    warn!("Could not rescan USB devices: {}", e);
                }
                SourceFlow::Keep
            }
            Ok(None) => SourceFlow::Keep,
            Err(e) => {
                error!("Could not read from notification mailbox: {}", e);
                SourceFlow::Remove
            }
        }
    }
}
