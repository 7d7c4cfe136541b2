//! In-process fakes for exercising the daemon without hardware or a
//! service manager

use crate::admin::{CreateOutcome, ServiceDefinition, ServiceRegistry, StartOutcome};
use crate::listener::{
    DeviceRegistration, ListenerError, NotificationReceiver, ReceiverEvent, ReceiverRemote,
};
use crate::network::{NetworkError, NetworkSubsystem};
use crate::platform::{DeviceNotifier, PlatformError};
use crate::relay::{DeviceEventSink, NotificationSink};
use crate::service::source::SourceError;
use crate::service::{
    ControlHandle, DeviceEventSource, ServiceState, ServiceStatus, StatusReporter,
};
use crate::usb::{UsbError, UsbSubsystem};
use common::DeviceChange;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

/// Ordered record of calls shared between fakes
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: &str) {
        self.0.lock().unwrap().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeUsb {
    pub journal: Journal,
    pub rescans: Arc<AtomicUsize>,
    pub fail_init: bool,
    pub fail_rescan: bool,
    pub on_init: Option<Box<dyn FnMut()>>,
}

impl FakeUsb {
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            rescans: Arc::new(AtomicUsize::new(0)),
            fail_init: false,
            fail_rescan: false,
            on_init: None,
        }
    }
}

impl UsbSubsystem for FakeUsb {
    fn init(&mut self) -> Result<(), UsbError> {
        self.journal.record("usb.init");
        if let Some(hook) = self.on_init.as_mut() {
            hook();
        }
        if self.fail_init {
            return Err(UsbError::Rusb(rusb::Error::NoDevice));
        }
        Ok(())
    }

    fn rescan(&mut self) -> Result<(), UsbError> {
        self.rescans.fetch_add(1, Ordering::SeqCst);
        if self.fail_rescan {
            return Err(UsbError::Rusb(rusb::Error::Io));
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.journal.record("usb.exit");
    }
}

pub struct FakeNetwork {
    pub journal: Journal,
    pub fail_init: bool,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            fail_init: false,
        }
    }
}

impl NetworkSubsystem for FakeNetwork {
    fn init(&mut self) -> Result<(), NetworkError> {
        self.journal.record("network.init");
        if self.fail_init {
            return Err(NetworkError::Bind {
                addr: "127.0.0.1:4223".to_string(),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            });
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.journal.record("network.exit");
    }
}

/// Device event source that holds the sink and records its lifecycle
pub struct FakeSource {
    pub journal: Journal,
    pub fail_start: bool,
    sink: Option<NotificationSink>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            fail_start: false,
            sink: None,
        }
    }
}

impl DeviceEventSource for FakeSource {
    fn start(&mut self, sink: NotificationSink) -> Result<(), SourceError> {
        self.journal.record("source.start");
        if self.fail_start {
            return Err(SourceError::Listener(ListenerError::Create(
                "scripted failure".to_string(),
            )));
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn register(&mut self) -> Result<(), SourceError> {
        self.journal.record("source.register");
        Ok(())
    }

    fn unregister(&mut self) {
        self.journal.record("source.unregister");
    }

    fn stop(&mut self) {
        self.journal.record("source.stop");
        self.sink.take();
    }
}

/// Status reporter that keeps every report
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<ServiceStatus>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<ServiceState> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|status| status.current_state)
            .collect()
    }

    pub fn last(&self) -> Option<ServiceStatus> {
        self.reports.lock().unwrap().last().cloned()
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, status: &ServiceStatus) -> Result<(), PlatformError> {
        self.reports.lock().unwrap().push(status.clone());
        Ok(())
    }
}

/// Sink that records every device change it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    changes: Arc<Mutex<Vec<DeviceChange>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<DeviceChange> {
        self.changes.lock().unwrap().clone()
    }
}

impl DeviceEventSink for RecordingSink {
    fn device_changed(&self, change: DeviceChange) {
        self.changes.lock().unwrap().push(change);
    }
}

type Scripted = Result<ReceiverEvent, ListenerError>;

/// Counts live registrations; decrements on drop
struct RegistrationGuard(Arc<AtomicUsize>);

impl RegistrationGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Receiver that replays events injected from the test thread
pub struct ScriptedReceiver {
    events: mpsc::Receiver<Scripted>,
    events_tx: mpsc::Sender<Scripted>,
    live: Arc<AtomicUsize>,
    registrations: Arc<AtomicUsize>,
}

impl Drop for ScriptedReceiver {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NotificationReceiver for ScriptedReceiver {
    type Remote = ScriptedRemote;

    fn remote(&self) -> ScriptedRemote {
        ScriptedRemote {
            events_tx: self.events_tx.clone(),
            registrations: self.registrations.clone(),
        }
    }

    fn next_event(&mut self) -> Result<ReceiverEvent, ListenerError> {
        match self.events.recv() {
            Ok(event) => event,
            Err(_) => Err(ListenerError::ReceiverDestroyed),
        }
    }
}

pub struct ScriptedRemote {
    events_tx: mpsc::Sender<Scripted>,
    registrations: Arc<AtomicUsize>,
}

impl ReceiverRemote for ScriptedRemote {
    fn post_terminate(&self) -> Result<(), ListenerError> {
        self.events_tx
            .send(Ok(ReceiverEvent::Terminate))
            .map_err(|e| ListenerError::Post(e.to_string()))
    }

    fn register_device_notification(&self) -> Result<DeviceRegistration, ListenerError> {
        Ok(DeviceRegistration::new(RegistrationGuard::new(
            self.registrations.clone(),
        )))
    }
}

/// Test side of a [`ScriptedReceiver`]
pub struct ScriptHandle {
    pub live: Arc<AtomicUsize>,
    pub registrations: Arc<AtomicUsize>,
    events_tx: mpsc::Sender<Scripted>,
}

impl ScriptHandle {
    pub fn inject(&self, event: ReceiverEvent) {
        let _ = self.events_tx.send(Ok(event));
    }

    pub fn inject_error(&self, error: ListenerError) {
        let _ = self.events_tx.send(Err(error));
    }
}

/// A script handle and a factory that creates the matching receiver on the listener thread
pub fn scripted_receiver() -> (
    ScriptHandle,
    impl FnOnce() -> Result<ScriptedReceiver, ListenerError> + Send + 'static,
) {
    let (events_tx, events) = mpsc::channel();
    let live = Arc::new(AtomicUsize::new(0));
    let registrations = Arc::new(AtomicUsize::new(0));

    let script = ScriptHandle {
        live: live.clone(),
        registrations: registrations.clone(),
        events_tx: events_tx.clone(),
    };

    let factory = move || -> Result<ScriptedReceiver, ListenerError> {
        live.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedReceiver {
            events,
            events_tx,
            live,
            registrations,
        })
    };

    (script, factory)
}

/// Factory that fails to create a receiver; the counter tracks live receivers
pub fn failing_receiver() -> (
    Arc<AtomicUsize>,
    impl FnOnce() -> Result<ScriptedReceiver, ListenerError> + Send + 'static,
) {
    let live = Arc::new(AtomicUsize::new(0));
    let factory = || -> Result<ScriptedReceiver, ListenerError> {
        Err(ListenerError::Create("scripted failure".to_string()))
    };
    (live, factory)
}

/// Notifier that hands out counted registrations without delivering events
#[derive(Debug, Default)]
pub struct FakeNotifier {
    pub registrations: Arc<AtomicUsize>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceNotifier for FakeNotifier {
    fn register(&self, _control: ControlHandle) -> Result<DeviceRegistration, PlatformError> {
        Ok(DeviceRegistration::new(RegistrationGuard::new(
            self.registrations.clone(),
        )))
    }
}

/// In-memory service registry
///
/// A running service reports StopPending for `polls_until_stopped` queries
/// after a stop request, then Stopped.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    pub services: BTreeMap<String, ServiceDefinition>,
    pub running: bool,
    pub polls_until_stopped: usize,
    pub fail_description: bool,
    stop_requested: bool,
    polls: Cell<usize>,
    calls: RefCell<Vec<String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn call(&self, name: &str) {
        self.calls.borrow_mut().push(name.to_string());
    }
}

impl ServiceRegistry for FakeRegistry {
    fn exists(&self, name: &str) -> io::Result<bool> {
        self.call("exists");
        Ok(self.services.contains_key(name))
    }

    fn create(&mut self, definition: &ServiceDefinition) -> io::Result<CreateOutcome> {
        self.call("create");
        if self.services.contains_key(&definition.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        self.services
            .insert(definition.name.clone(), definition.clone());
        Ok(CreateOutcome::Created)
    }

    fn set_description(&mut self, name: &str, description: &str) -> io::Result<()> {
        self.call("set_description");
        if self.fail_description {
            return Err(io::Error::other("access denied"));
        }
        match self.services.get_mut(name) {
            Some(definition) => {
                definition.description = description.to_string();
                Ok(())
            }
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn set_command(&mut self, definition: &ServiceDefinition) -> io::Result<()> {
        self.call("set_command");
        match self.services.get_mut(&definition.name) {
            Some(existing) => {
                existing.executable = definition.executable.clone();
                existing.args = definition.args.clone();
                Ok(())
            }
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn start(&mut self, _name: &str) -> io::Result<StartOutcome> {
        self.call("start");
        if self.running && !self.stop_requested {
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.running = true;
        self.stop_requested = false;
        Ok(StartOutcome::Started)
    }

    fn query(&self, _name: &str) -> io::Result<ServiceState> {
        self.call("query");
        if !self.running {
            return Ok(ServiceState::Stopped);
        }
        if !self.stop_requested {
            return Ok(ServiceState::Running);
        }

        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        if polls >= self.polls_until_stopped {
            Ok(ServiceState::Stopped)
        } else {
            Ok(ServiceState::StopPending)
        }
    }

    fn stop(&mut self, _name: &str) -> io::Result<()> {
        self.call("stop");
        self.stop_requested = true;
        self.polls.set(0);
        Ok(())
    }

    fn delete(&mut self, name: &str) -> io::Result<()> {
        self.call("delete");
        self.services.remove(name);
        self.running = false;
        self.stop_requested = false;
        Ok(())
    }
}
