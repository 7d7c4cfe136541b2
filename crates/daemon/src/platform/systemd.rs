//! systemd integration
//!
//! Status changes are sent with the sd-notify protocol. Device events come
//! from a libusb hotplug pump on its own listener thread and are delivered
//! to the controller as control requests.

use super::{ControlForwarder, DeviceNotifier, PlatformError};
use crate::listener::{DeviceRegistration, HotplugReceiver, ListenerThread};
use crate::service::{ControlHandle, ServiceState, ServiceStatus, StatusReporter};
use std::env;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use tracing::debug;

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var_os("NOTIFY_SOCKET").is_some()
}

/// Reports service status to systemd over `NOTIFY_SOCKET`
#[derive(Debug, Clone)]
pub struct SystemdReporter {
    socket_path: Option<String>,
}

impl SystemdReporter {
    pub fn from_env() -> Self {
        Self {
            socket_path: env::var("NOTIFY_SOCKET").ok(),
        }
    }

    #[cfg(test)]
    pub fn with_socket(path: impl Into<String>) -> Self {
        Self {
            socket_path: Some(path.into()),
        }
    }

    fn message(status: &ServiceStatus) -> String {
        match status.current_state {
            ServiceState::StartPending => "STATUS=Starting".to_string(),
            ServiceState::Running => "READY=1\nSTATUS=Running".to_string(),
            ServiceState::StopPending => "STOPPING=1\nSTATUS=Stopping".to_string(),
            ServiceState::Stopped if status.exit_code != 0 => {
                format!("STATUS=Stopped\nERRNO={}", status.exit_code)
            }
            ServiceState::Stopped => "STATUS=Stopped".to_string(),
        }
    }

    fn notify(&self, message: &str) -> Result<(), PlatformError> {
        let Some(path) = self.socket_path.as_deref() else {
            debug!("NOTIFY_SOCKET not set, skipping systemd notification");
            return Ok(());
        };

        // A leading '@' names a socket in the abstract namespace
        let addr = match path.strip_prefix('@') {
            Some(name) => abstract_addr(name),
            None => SocketAddr::from_pathname(path),
        }
        .map_err(PlatformError::Notify)?;

        let socket = UnixDatagram::unbound().map_err(PlatformError::Notify)?;
        socket
            .send_to_addr(message.as_bytes(), &addr)
            .map_err(PlatformError::Notify)?;

        debug!("Notified systemd: {}", message.replace('\n', ", "));
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn abstract_addr(name: &str) -> std::io::Result<SocketAddr> {
    use std::os::linux::net::SocketAddrExt;
    SocketAddr::from_abstract_name(name.as_bytes())
}

#[cfg(not(target_os = "linux"))]
fn abstract_addr(_name: &str) -> std::io::Result<SocketAddr> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "abstract sockets are not supported on this platform",
    ))
}

impl StatusReporter for SystemdReporter {
    fn report(&self, status: &ServiceStatus) -> Result<(), PlatformError> {
        self.notify(&Self::message(status))
    }
}

/// Device events from a libusb hotplug pump
#[derive(Debug, Default)]
pub struct HotplugNotifier;

impl DeviceNotifier for HotplugNotifier {
    fn register(&self, control: ControlHandle) -> Result<DeviceRegistration, PlatformError> {
        let mut listener = ListenerThread::<HotplugReceiver>::new();
        listener.start(HotplugReceiver::create, ControlForwarder::new(control))?;
        let registration = listener.register_device_notification()?;

        // The subscription is dropped before the listener is stopped
        Ok(DeviceRegistration::new((registration, listener)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn status_in(states: &[ServiceState]) -> ServiceStatus {
        let mut status = ServiceStatus::new();
        for state in states {
            status.transition(*state).unwrap();
        }
        status
    }

    #[test]
    fn test_messages() {
        let running = status_in(&[ServiceState::StartPending, ServiceState::Running]);
        assert_eq!(SystemdReporter::message(&running), "READY=1\nSTATUS=Running");

        let stopping = status_in(&[ServiceState::StartPending, ServiceState::StopPending]);
        assert!(SystemdReporter::message(&stopping).starts_with("STOPPING=1"));

        let mut failed = status_in(&[ServiceState::StartPending, ServiceState::Stopped]);
        failed.exit_code = 1;
        assert_eq!(
            SystemdReporter::message(&failed),
            "STATUS=Stopped\nERRNO=1"
        );
    }

    #[test]
    fn test_report_without_socket_is_noop() {
        let reporter = SystemdReporter { socket_path: None };
        assert!(reporter.report(&ServiceStatus::new()).is_ok());
    }

    #[test]
    fn test_report_reaches_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path).unwrap();

        let reporter = SystemdReporter::with_socket(path.to_str().unwrap());
        let running = status_in(&[ServiceState::StartPending, ServiceState::Running]);
        reporter.report(&running).unwrap();

        let mut buf = [0u8; 128];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"READY=1\nSTATUS=Running");
    }

    #[test]
    fn test_report_to_missing_socket_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.sock");
        let reporter = SystemdReporter::with_socket(path.to_str().unwrap());

        assert!(matches!(
            reporter.report(&ServiceStatus::new()),
            Err(PlatformError::Notify(_))
        ));
    }
}
