//! Service lifecycle
//!
//! The controller and its state machine are platform neutral. Platform code
//! reports status through a [`StatusReporter`] and feeds control requests
//! through a [`ControlHandle`].

pub mod control;
pub mod controller;
pub mod progress;
pub mod source;
pub mod status;

use crate::platform::PlatformError;
use tracing::debug;

pub use control::{ControlCode, ControlReply};
pub use controller::{ControlHandle, RunOutcome, ServiceController, Subsystems};
pub use source::{DeviceEventSource, ListenerSource, ServiceManagerSource};
pub use status::{ServiceState, ServiceStatus};

/// Sink for externally observed status changes
pub trait StatusReporter: Send + Sync {
    fn report(&self, status: &ServiceStatus) -> Result<(), PlatformError>;
}

/// Reporter for console mode, where nobody outside observes the status
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl StatusReporter for ConsoleReporter {
    fn report(&self, status: &ServiceStatus) -> Result<(), PlatformError> {
        debug!("Service state is now {:?}", status.current_state);
        Ok(())
    }
}
