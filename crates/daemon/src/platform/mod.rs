//! Platform side of the service control surface
//!
//! Everything that talks to the host OS about the service lives here:
//! status notifications to the service manager, signal dispatch, and the
//! hotplug pump that stands in for manager-delivered device events.

pub mod signals;
pub mod systemd;

use crate::listener::{DeviceRegistration, ListenerError};
use crate::relay::DeviceEventSink;
use crate::service::{ControlCode, ControlHandle, ControlReply};
use common::DeviceChange;
use thiserror::Error;
use tracing::debug;

pub use signals::SignalDispatcher;
pub use systemd::{HotplugNotifier, SystemdReporter, is_systemd};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Could not notify service manager: {0}")]
    Notify(#[source] std::io::Error),

    #[error("Could not install signal handler: {0}")]
    Signals(#[source] std::io::Error),

    #[error("Could not spawn signal dispatcher: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Subscribes a running service to device events
///
/// Events are delivered as [`ControlCode::DeviceEvent`] requests on the
/// given handle until the returned registration is dropped.
pub trait DeviceNotifier {
    fn register(&self, control: ControlHandle) -> Result<DeviceRegistration, PlatformError>;
}

/// Turns device changes into device event control requests
pub struct ControlForwarder {
    control: ControlHandle,
}

impl ControlForwarder {
    pub fn new(control: ControlHandle) -> Self {
        Self { control }
    }
}

impl DeviceEventSink for ControlForwarder {
    fn device_changed(&self, change: DeviceChange) {
        let reply = self
            .control
            .control_request(ControlCode::DeviceEvent(change.into()));

        if reply != ControlReply::NoError {
            debug!("Device event {} was not accepted: {:?}", change, reply);
        }
    }
}
