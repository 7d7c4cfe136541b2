//! Signal dispatch
//!
//! A dedicated thread waits for the configured signals and turns each one
//! into a control request. In service mode signals are the service
//! manager's control surface; in console mode they are the interrupt
//! handler.

use super::PlatformError;
use crate::service::{ControlCode, ControlHandle, ControlReply};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1};
use signal_hook::iterator::{Handle, Signals};
use std::os::raw::c_int;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Signals the service manager uses to control the service
pub const SERVICE_SIGNALS: [c_int; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGUSR1];

/// Interactive break, break, window close or logoff, and shutdown
pub const CONSOLE_SIGNALS: [c_int; 4] = [SIGINT, SIGQUIT, SIGHUP, SIGTERM];

pub fn service_control_code(signal: c_int) -> ControlCode {
    match signal {
        SIGTERM | SIGINT => ControlCode::Stop,
        SIGQUIT => ControlCode::Shutdown,
        SIGUSR1 => ControlCode::Interrogate,
        other => ControlCode::Other(other as u32),
    }
}

/// Every console signal asks the daemon to stop
pub fn console_control_code(signal: c_int) -> ControlCode {
    info!("Received {}, stopping", signal_name(signal));
    ControlCode::Stop
}

fn signal_name(signal: c_int) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGQUIT => "SIGQUIT",
        SIGHUP => "SIGHUP",
        SIGTERM => "SIGTERM",
        SIGUSR1 => "SIGUSR1",
        _ => "unknown signal",
    }
}

/// Thread that forwards signals to a [`ControlHandle`]
pub struct SignalDispatcher {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalDispatcher {
    pub fn start<M>(
        signals: &[c_int],
        control: ControlHandle,
        map: M,
    ) -> Result<Self, PlatformError>
    where
        M: Fn(c_int) -> ControlCode + Send + 'static,
    {
        let mut signals = Signals::new(signals).map_err(PlatformError::Signals)?;
        let handle = signals.handle();

        let thread = std::thread::Builder::new()
            .name("signal-dispatcher".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    let code = map(signal);
                    if control.control_request(code) == ControlReply::CallNotImplemented {
                        debug!("Ignoring {} ({})", signal_name(signal), signal);
                    }
                }
                debug!("Signal dispatcher stopped");
            })
            .map_err(PlatformError::Spawn)?;

        debug!("Signal dispatcher started");

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Stop waiting for signals and join the thread
    pub fn shutdown(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Signal dispatcher thread panicked");
        }
    }
}

impl Drop for SignalDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
