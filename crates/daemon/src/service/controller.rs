//! Service lifecycle controller
//!
//! Drives one run of the daemon: reports StartPending, brings the
//! subsystems up in a fixed order while recording each success, reports
//! Running, runs the event loop, and finally unwinds exactly what was
//! started before reporting Stopped.
//!
//! Control requests arrive on other threads through a [`ControlHandle`].
//! A stop request stops the event loop; if it arrives before the loop is
//! running, bring-up is abandoned at the next step boundary.

use super::control::{ControlAction, ControlCode, ControlReply, map_control};
use super::progress::{InitProgress, Subsystem};
use super::source::{DeviceEventSource, SourceError};
use super::status::{ServiceState, ServiceStatus};
use super::StatusReporter;
use crate::event_loop::{EventLoop, EventLoopError, SourceId, StopHandle};
use crate::network::{NetworkError, NetworkSubsystem};
use crate::relay::{NotificationRelay, NotificationSink};
use crate::usb::{SharedUsb, UsbError};
use common::{MailboxReader, MailboxWriter, mailbox};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BringUpError {
    #[error("Could not create event loop: {0}")]
    EventLoop(#[from] EventLoopError),

    #[error("Could not initialize USB subsystem: {0}")]
    Usb(#[from] UsbError),

    #[error("Could not start device event source: {0}")]
    Source(#[from] SourceError),

    #[error("Could not initialize network subsystem: {0}")]
    Network(#[from] NetworkError),

    #[error("Event loop failed: {0}")]
    Run(EventLoopError),
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Reached Running and stopped on request
    Completed,
    /// A stop request arrived before Running
    Interrupted,
    /// Bring-up failed; everything started so far was torn down
    Failed(BringUpError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::Failed(_))
    }
}

/// Subsystems one run brings up
pub struct Subsystems {
    pub usb: SharedUsb,
    pub network: Box<dyn NetworkSubsystem>,
    pub source: Box<dyn DeviceEventSource>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    status: Mutex<ServiceStatus>,
    reporter: Box<dyn StatusReporter>,
    stop_requested: AtomicBool,
    stop_handle: Mutex<Option<StopHandle>>,
    sink: Mutex<Option<NotificationSink>>,
}

impl Shared {
    /// Move to `state` and report it; returns false if the move was not allowed
    fn set_state(&self, state: ServiceState, exit_code: u32) -> bool {
        let mut status = lock(&self.status);

        if let Err(e) = status.transition(state) {
            debug!("{}", e);
            return false;
        }
        if state == ServiceState::Stopped {
            status.exit_code = exit_code;
        }

        if let Err(e) = self.reporter.report(&status) {
            warn!("Could not report service status {:?}: {}", state, e);
        }
        true
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.stop_handle).as_ref() {
            handle.stop();
        }
    }

    fn install_stop_handle(&self, handle: StopHandle) {
        *lock(&self.stop_handle) = Some(handle.clone());
        if self.stop_requested.load(Ordering::SeqCst) {
            handle.stop();
        }
    }
}

/// Thread-safe entry point for control requests
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
}

impl ControlHandle {
    pub fn control_request(&self, code: ControlCode) -> ControlReply {
        match map_control(code) {
            ControlAction::Acknowledge => {
                let status = lock(&self.shared.status);
                if let Err(e) = self.shared.reporter.report(&status) {
                    warn!("Could not report service status: {}", e);
                }
                ControlReply::NoError
            }
            ControlAction::BeginStop(reason) => {
                info!("Got {} request", reason);

                let state = self.status().current_state;
                if matches!(state, ServiceState::StartPending | ServiceState::Running) {
                    self.shared.set_state(ServiceState::StopPending, 0);
                }
                self.shared.request_stop();
                ControlReply::NoError
            }
            ControlAction::ForwardDevice(change) => {
                match lock(&self.shared.sink).as_ref() {
                    Some(sink) => sink.signal(change),
                    None => debug!("No relay attached, ignoring {} notification", change),
                }
                ControlReply::NoError
            }
            ControlAction::NotImplemented => {
                debug!("Rejecting unsupported control request {:?}", code);
                ControlReply::CallNotImplemented
            }
        }
    }

    /// Route device events to the relay of the current run
    pub fn attach_sink(&self, sink: NotificationSink) {
        *lock(&self.shared.sink) = Some(sink);
    }

    pub fn detach_sink(&self) {
        lock(&self.shared.sink).take();
    }

    pub fn status(&self) -> ServiceStatus {
        lock(&self.shared.status).clone()
    }
}

enum Abort {
    Stopped,
    Failed(BringUpError),
}

fn fail<E: Into<BringUpError>>(e: E) -> Abort {
    Abort::Failed(e.into())
}

/// Resources of one run, each released by the matching teardown step
struct Active {
    subsystems: Subsystems,
    event_loop: Option<EventLoop>,
    writer: Option<MailboxWriter>,
    reader: Option<MailboxReader>,
    relay_source: Option<SourceId>,
}

impl Active {
    fn tear_down(&mut self, subsystem: Subsystem, shared: &Shared) {
        debug!("Tearing down {:?}", subsystem);

        match subsystem {
            Subsystem::Network => self.subsystems.network.exit(),
            Subsystem::DeviceNotification => self.subsystems.source.unregister(),
            Subsystem::NotificationSource => self.subsystems.source.stop(),
            Subsystem::RelaySource => {
                if let (Some(event_loop), Some(id)) =
                    (self.event_loop.as_mut(), self.relay_source.take())
                {
                    event_loop.unregister_source(id);
                }
            }
            Subsystem::Mailbox => {
                self.writer.take();
                self.reader.take();
            }
            Subsystem::Usb => self.subsystems.usb.borrow_mut().exit(),
            Subsystem::EventLoop => {
                lock(&shared.stop_handle).take();
                self.event_loop.take();
            }
        }
    }
}

pub struct ServiceController {
    shared: Arc<Shared>,
}

impl ServiceController {
    pub fn new(reporter: Box<dyn StatusReporter>) -> Self {
        Self {
            shared: Arc::new(Shared {
                status: Mutex::new(ServiceStatus::new()),
                reporter,
                stop_requested: AtomicBool::new(false),
                stop_handle: Mutex::new(None),
                sink: Mutex::new(None),
            }),
        }
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            shared: self.shared.clone(),
        }
    }

    /// Execute one full run; the terminal Stopped state is always reported
    pub fn run(&self, subsystems: Subsystems) -> RunOutcome {
        let mut active = Active {
            subsystems,
            event_loop: None,
            writer: None,
            reader: None,
            relay_source: None,
        };
        let mut progress = InitProgress::new();

        self.shared.set_state(ServiceState::StartPending, 0);

        let outcome = match self.bring_up(&mut active, &mut progress) {
            Ok(()) => self.serve(&active),
            Err(Abort::Stopped) => {
                info!("Stop requested during startup");
                RunOutcome::Interrupted
            }
            Err(Abort::Failed(e)) => RunOutcome::Failed(e),
        };

        self.shared.set_state(ServiceState::StopPending, 0);

        let shared = &self.shared;
        progress.unwind(|subsystem| active.tear_down(subsystem, shared));

        let exit_code = if outcome.is_success() { 0 } else { 1 };
        self.shared.set_state(ServiceState::Stopped, exit_code);

        outcome
    }

    /// Report Stopped without running; for callers that fail before `run`
    pub fn abandon(&self) {
        self.shared.set_state(ServiceState::Stopped, 1);
    }

    fn checkpoint(&self) -> Result<(), Abort> {
        if self.shared.stop_requested.load(Ordering::SeqCst) {
            Err(Abort::Stopped)
        } else {
            Ok(())
        }
    }

    fn bring_up(&self, active: &mut Active, progress: &mut InitProgress) -> Result<(), Abort> {
        self.checkpoint()?;
        let event_loop = EventLoop::new().map_err(fail)?;
        self.shared.install_stop_handle(event_loop.stop_handle());
        let event_loop = active.event_loop.insert(event_loop);
        progress.mark(Subsystem::EventLoop);

        self.checkpoint()?;
        active.subsystems.usb.borrow_mut().init().map_err(fail)?;
        progress.mark(Subsystem::Usb);

        self.checkpoint()?;
        let (writer, reader) = mailbox();
        active.writer = Some(writer);
        active.reader = Some(reader);
        progress.mark(Subsystem::Mailbox);

        self.checkpoint()?;
        if let Some(reader) = active.reader.take() {
            let mut relay = NotificationRelay::new(active.subsystems.usb.clone());
            let id = event_loop.register_source(reader, move |reader| relay.on_readable(reader));
            active.relay_source = Some(id);
            progress.mark(Subsystem::RelaySource);
        }

        self.checkpoint()?;
        if let Some(writer) = active.writer.take() {
            active
                .subsystems
                .source
                .start(NotificationSink::new(writer))
                .map_err(fail)?;
            progress.mark(Subsystem::NotificationSource);
        }

        self.checkpoint()?;
        active.subsystems.source.register().map_err(fail)?;
        progress.mark(Subsystem::DeviceNotification);

        self.checkpoint()?;
        active.subsystems.network.init().map_err(fail)?;
        progress.mark(Subsystem::Network);

        self.checkpoint()?;
        Ok(())
    }

    fn serve(&self, active: &Active) -> RunOutcome {
        let Some(event_loop) = active.event_loop.as_ref() else {
            return RunOutcome::Interrupted;
        };

        if !self.shared.set_state(ServiceState::Running, 0) {
            // A stop request moved the status on between the last check and here
            return RunOutcome::Interrupted;
        }

        match event_loop.run() {
            Ok(()) => RunOutcome::Completed,
            Err(e) => RunOutcome::Failed(BringUpError::Run(e)),
        }
    }
}
