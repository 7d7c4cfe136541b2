//! Hotplug listener thread
//!
//! Some notification receivers must live on the thread that created them.
//! The listener gives such a receiver a dedicated thread, hands a
//! thread-safe remote back to the caller once the receiver is live, and
//! forwards device changes to a [`DeviceEventSink`](crate::relay::DeviceEventSink).

pub mod hotplug;
pub mod thread;

use common::DeviceChange;
use thiserror::Error;

pub use hotplug::HotplugReceiver;
pub use thread::ListenerThread;

pub const LOG_TARGET: &str = module_path!();

/// Event produced by a receiver's blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// A termination request posted through the remote
    Terminate,
    /// A device was attached or detached
    DeviceChange(DeviceChange),
    /// Anything else; handled by the receiver itself
    Idle,
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Could not create notification receiver: {0}")]
    Create(String),

    #[error("Notification receiver was destroyed")]
    ReceiverDestroyed,

    #[error("Could not wait for receiver event: {0}")]
    Wait(String),

    #[error("Could not post termination request: {0}")]
    Post(String),

    #[error("Could not register for device notifications: {0}")]
    Register(String),

    #[error("Could not spawn listener thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Listener thread exited before reporting readiness")]
    HandshakeLost,

    #[error("Listener was already started")]
    AlreadyStarted,

    #[error("Listener is not running")]
    NotRunning,
}

/// Platform notification receiver, confined to the listener thread
pub trait NotificationReceiver: 'static {
    type Remote: ReceiverRemote;

    /// Handle for other threads to reach this receiver
    fn remote(&self) -> Self::Remote;

    /// Block until the next event
    ///
    /// Must return [`ListenerError::ReceiverDestroyed`] once the receiver
    /// was torn down from outside, so the dispatch loop can exit.
    fn next_event(&mut self) -> Result<ReceiverEvent, ListenerError>;
}

/// Thread-safe side of a receiver
pub trait ReceiverRemote: Send + 'static {
    /// Ask the dispatch loop to exit
    fn post_terminate(&self) -> Result<(), ListenerError>;

    /// Subscribe the receiver to device arrival/removal notifications
    fn register_device_notification(&self) -> Result<DeviceRegistration, ListenerError>;
}

/// Active device notification subscription; dropping it unsubscribes
pub struct DeviceRegistration {
    _guard: Box<dyn Send>,
}

impl DeviceRegistration {
    pub fn new<G: Send + 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for DeviceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistration").finish_non_exhaustive()
    }
}
