//! Common utilities for usb-bridged
//!
//! This crate provides the pieces shared by the daemon binary and its tests:
//! the error type, logging setup, and the single-slot mailbox that carries
//! hotplug signals from notification threads into the event loop.

pub mod error;
pub mod logging;
pub mod mailbox;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::{LogSettings, setup_logging};
pub use mailbox::{DeviceChange, MailboxReader, MailboxWriter, mailbox};
