//! Listener thread lifecycle

use super::{DeviceRegistration, ListenerError, NotificationReceiver, ReceiverEvent, ReceiverRemote};
use crate::relay::DeviceEventSink;
use std::marker::PhantomData;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    NotCreated,
    Starting,
    Live,
    Stopping,
    Destroyed,
}

/// Owns a notification receiver and the thread it runs on
///
/// Created once per run. [`ListenerThread::stop`] is a no-op unless the
/// listener is live, so it can be called on any path through teardown.
pub struct ListenerThread<R: NotificationReceiver> {
    state: ListenerState,
    remote: Option<R::Remote>,
    thread: Option<JoinHandle<()>>,
    _receiver: PhantomData<fn() -> R>,
}

impl<R: NotificationReceiver> Default for ListenerThread<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: NotificationReceiver> ListenerThread<R> {
    pub fn new() -> Self {
        Self {
            state: ListenerState::NotCreated,
            remote: None,
            thread: None,
            _receiver: PhantomData,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Spawn the thread, create the receiver on it and wait until it is live
    ///
    /// `factory` runs on the listener thread. On failure the thread has
    /// already been joined and nothing is left behind.
    pub fn start<F, S>(&mut self, factory: F, sink: S) -> Result<(), ListenerError>
    where
        F: FnOnce() -> Result<R, ListenerError> + Send + 'static,
        S: DeviceEventSink,
    {
        if self.state != ListenerState::NotCreated {
            return Err(ListenerError::AlreadyStarted);
        }

        debug!("Starting listener");
        self.state = ListenerState::Starting;

        let (ready_tx, ready_rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("hotplug-listener".to_string())
            .spawn(move || listener_main::<R, F, S>(factory, sink, ready_tx));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.state = ListenerState::Destroyed;
                return Err(ListenerError::Spawn(e));
            }
        };

        // The handshake is unbounded: receiver creation is a local call
        let ready = ready_rx.blocking_recv();

        match ready {
            Ok(Ok(remote)) => {
                self.remote = Some(remote);
                self.thread = Some(thread);
                self.state = ListenerState::Live;
                debug!("Listener is live");
                Ok(())
            }
            Ok(Err(e)) => {
                join_listener(thread);
                self.state = ListenerState::Destroyed;
                Err(e)
            }
            Err(_) => {
                join_listener(thread);
                self.state = ListenerState::Destroyed;
                Err(ListenerError::HandshakeLost)
            }
        }
    }

    /// Register the live receiver for device notifications
    pub fn register_device_notification(&self) -> Result<DeviceRegistration, ListenerError> {
        match (&self.state, &self.remote) {
            (ListenerState::Live, Some(remote)) => remote.register_device_notification(),
            _ => Err(ListenerError::NotRunning),
        }
    }

    /// Post a termination request and join the thread
    ///
    /// The join relies on the dispatch loop honouring the request. A failed
    /// post is logged and the join is still attempted.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        debug!("Stopping listener");
        self.state = ListenerState::Stopping;

        if let Some(remote) = self.remote.take()
            && let Err(e) = remote.post_terminate()
        {
            warn!("Could not trigger termination of listener: {}", e);
        }

        join_listener(thread);
        self.state = ListenerState::Destroyed;
    }
}

impl<R: NotificationReceiver> Drop for ListenerThread<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_listener(thread: JoinHandle<()>) {
    if thread.join().is_err() {
        error!("Listener thread panicked");
    }
}

fn listener_main<R, F, S>(
    factory: F,
    sink: S,
    ready: oneshot::Sender<Result<R::Remote, ListenerError>>,
) where
    R: NotificationReceiver,
    F: FnOnce() -> Result<R, ListenerError>,
    S: DeviceEventSink,
{
    debug!("Started listener thread");

    let mut receiver = match factory() {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("{}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(receiver.remote())).is_err() {
        warn!("Listener start was abandoned before the receiver went live");
        return;
    }

    dispatch(&mut receiver, &sink);
    drop(receiver);

    debug!("Stopped listener thread");
}

/// Pause after the first failed wait; doubles with each further failure
const ERROR_BACKOFF: Duration = Duration::from_millis(10);
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(1);

fn error_backoff(failures: u32) -> Duration {
    ERROR_BACKOFF
        .saturating_mul(1 << failures.min(16))
        .min(MAX_ERROR_BACKOFF)
}

/// Dispatch loop; runs only on the listener thread
fn dispatch<R: NotificationReceiver, S: DeviceEventSink>(receiver: &mut R, sink: &S) {
    let mut failures = 0u32;

    loop {
        let event = match receiver.next_event() {
            Ok(event) => event,
            Err(ListenerError::ReceiverDestroyed) => {
                debug!("Notification receiver seems to be destroyed");
                break;
            }
            Err(e) => {
                // Only the first of a run of failures is worth a warning
                if failures == 0 {
                    warn!("{}", e);
                } else {
                    debug!("{} ({} failures in a row)", e, failures + 1);
                }
                std::thread::sleep(error_backoff(failures));
                failures = failures.saturating_add(1);
                continue;
            }
        };

        if failures > 1 {
            debug!("Notification receiver recovered after {} failures", failures);
        }
        failures = 0;

        match event {
            ReceiverEvent::Terminate => {
                debug!("Received termination request");
                break;
            }
            ReceiverEvent::DeviceChange(change) => sink.device_changed(change),
            ReceiverEvent::Idle => {}
        }
    }
}
