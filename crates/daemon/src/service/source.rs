//! Where device change notifications come from
//!
//! Console mode owns a [`ListenerThread`] that pumps a hotplug receiver.
//! Service mode leaves notification delivery to the service manager side of
//! the platform, which feeds device events through the control surface.

use super::controller::ControlHandle;
use crate::listener::{DeviceRegistration, ListenerError, ListenerThread, NotificationReceiver};
use crate::platform::{DeviceNotifier, PlatformError};
use crate::relay::NotificationSink;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Device event source was already started")]
    AlreadyStarted,
}

/// Delivers device changes into a [`NotificationSink`]
///
/// Bring-up calls `start` then `register`; teardown calls `unregister` and
/// `stop` for whichever of the two succeeded.
pub trait DeviceEventSource {
    fn start(&mut self, sink: NotificationSink) -> Result<(), SourceError>;
    fn register(&mut self) -> Result<(), SourceError>;
    fn unregister(&mut self);
    fn stop(&mut self);
}

/// Source backed by a dedicated listener thread
pub struct ListenerSource<R, F>
where
    R: NotificationReceiver,
{
    listener: ListenerThread<R>,
    factory: Option<F>,
    registration: Option<DeviceRegistration>,
}

impl<R, F> ListenerSource<R, F>
where
    R: NotificationReceiver,
    F: FnOnce() -> Result<R, ListenerError> + Send + 'static,
{
    pub fn new(factory: F) -> Self {
        Self {
            listener: ListenerThread::new(),
            factory: Some(factory),
            registration: None,
        }
    }
}

impl<R, F> DeviceEventSource for ListenerSource<R, F>
where
    R: NotificationReceiver,
    F: FnOnce() -> Result<R, ListenerError> + Send + 'static,
{
    fn start(&mut self, sink: NotificationSink) -> Result<(), SourceError> {
        let factory = self.factory.take().ok_or(SourceError::AlreadyStarted)?;
        self.listener.start(factory, sink)?;
        Ok(())
    }

    fn register(&mut self) -> Result<(), SourceError> {
        let registration = self.listener.register_device_notification()?;
        self.registration = Some(registration);
        debug!("Registered listener for device notifications");
        Ok(())
    }

    fn unregister(&mut self) {
        if self.registration.take().is_some() {
            debug!("Unregistered listener from device notifications");
        }
    }

    fn stop(&mut self) {
        self.listener.stop();
    }
}

/// Source fed by device events arriving through the control surface
pub struct ServiceManagerSource {
    control: ControlHandle,
    notifier: Box<dyn DeviceNotifier>,
    registration: Option<DeviceRegistration>,
}

impl ServiceManagerSource {
    pub fn new(control: ControlHandle, notifier: Box<dyn DeviceNotifier>) -> Self {
        Self {
            control,
            notifier,
            registration: None,
        }
    }
}

impl DeviceEventSource for ServiceManagerSource {
    fn start(&mut self, sink: NotificationSink) -> Result<(), SourceError> {
        self.control.attach_sink(sink);
        Ok(())
    }

    fn register(&mut self) -> Result<(), SourceError> {
        let registration = self.notifier.register(self.control.clone())?;
        self.registration = Some(registration);
        debug!("Registered service for device notifications");
        Ok(())
    }

    fn unregister(&mut self) {
        if self.registration.take().is_some() {
            debug!("Unregistered service from device notifications");
        }
    }

    fn stop(&mut self) {
        self.control.detach_sink();
    }
}
