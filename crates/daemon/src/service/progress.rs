//! Record of which subsystems came up, for bounded teardown

/// Bring-up steps in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    EventLoop,
    Usb,
    Mailbox,
    RelaySource,
    NotificationSource,
    DeviceNotification,
    Network,
}

/// Stack of subsystems that started successfully in this run
#[derive(Debug, Default)]
pub struct InitProgress {
    started: Vec<Subsystem>,
}

impl InitProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, subsystem: Subsystem) {
        self.started.push(subsystem);
    }

    #[cfg(test)]
    pub fn started(&self) -> &[Subsystem] {
        &self.started
    }

    /// Tear down every started subsystem, most recent first
    ///
    /// Each step runs regardless of how the others went.
    pub fn unwind<F>(&mut self, mut tear_down: F)
    where
        F: FnMut(Subsystem),
    {
        while let Some(subsystem) = self.started.pop() {
            tear_down(subsystem);
        }
    }
}
