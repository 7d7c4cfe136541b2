//! libusb hotplug receiver
//!
//! libusb delivers hotplug callbacks from inside `handle_events`, so the
//! context is pumped on the listener thread. Callbacks and termination
//! requests both land in one queue that [`HotplugReceiver::next_event`]
//! drains between pumps.

use super::{DeviceRegistration, ListenerError, NotificationReceiver, ReceiverEvent, ReceiverRemote};
use common::DeviceChange;
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on how long a termination request waits for the pump
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct HotplugReceiver {
    context: Context,
    events_tx: mpsc::Sender<ReceiverEvent>,
    events_rx: mpsc::Receiver<ReceiverEvent>,
}

impl HotplugReceiver {
    /// Create a receiver with its own libusb context
    pub fn create() -> Result<Self, ListenerError> {
        if !rusb::has_hotplug() {
            return Err(ListenerError::Create(
                "libusb has no hotplug support on this platform".to_string(),
            ));
        }

        let context = Context::new().map_err(|e| ListenerError::Create(e.to_string()))?;
        let (events_tx, events_rx) = mpsc::channel();

        debug!("Created hotplug receiver");

        Ok(Self {
            context,
            events_tx,
            events_rx,
        })
    }
}

impl NotificationReceiver for HotplugReceiver {
    type Remote = HotplugRemote;

    fn remote(&self) -> HotplugRemote {
        HotplugRemote {
            context: self.context.clone(),
            events_tx: self.events_tx.clone(),
        }
    }

    fn next_event(&mut self) -> Result<ReceiverEvent, ListenerError> {
        if let Ok(event) = self.events_rx.try_recv() {
            return Ok(event);
        }

        match self.context.handle_events(Some(EVENT_TIMEOUT)) {
            Ok(()) | Err(rusb::Error::Interrupted) => {}
            Err(rusb::Error::NoDevice) => return Err(ListenerError::ReceiverDestroyed),
            Err(e) => return Err(ListenerError::Wait(e.to_string())),
        }

        Ok(self.events_rx.try_recv().unwrap_or(ReceiverEvent::Idle))
    }
}

pub struct HotplugRemote {
    context: Context,
    events_tx: mpsc::Sender<ReceiverEvent>,
}

impl ReceiverRemote for HotplugRemote {
    fn post_terminate(&self) -> Result<(), ListenerError> {
        self.events_tx
            .send(ReceiverEvent::Terminate)
            .map_err(|e| ListenerError::Post(e.to_string()))
    }

    fn register_device_notification(&self) -> Result<DeviceRegistration, ListenerError> {
        let callback = HotplugForwarder {
            events_tx: self.events_tx.clone(),
        };

        let registration: Registration<Context> = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(callback))
            .map_err(|e| ListenerError::Register(e.to_string()))?;

        debug!("Hot-plug callbacks registered");
        Ok(DeviceRegistration::new(registration))
    }
}

/// Hot-plug callback handler
///
/// Runs inside `handle_events` on the listener thread and only queues the
/// change for the dispatch loop.
struct HotplugForwarder {
    events_tx: mpsc::Sender<ReceiverEvent>,
}

impl HotplugForwarder {
    fn forward(&self, change: DeviceChange) {
        if let Err(e) = self.events_tx.send(ReceiverEvent::DeviceChange(change)) {
            warn!("Could not queue {} notification: {}", change, e);
        }
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.forward(DeviceChange::Arrival);
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.forward(DeviceChange::Removal);
    }
}
