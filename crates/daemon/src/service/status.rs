//! Externally observed service status

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    StartPending,
    Running,
    StopPending,
}

/// Control requests the service currently accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptedControls(u32);

impl AcceptedControls {
    pub const STOP: AcceptedControls = AcceptedControls(0x1);
    pub const SHUTDOWN: AcceptedControls = AcceptedControls(0x4);

    pub const fn empty() -> Self {
        AcceptedControls(0)
    }

    #[cfg(test)]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[cfg(test)]
    pub fn contains(self, other: AcceptedControls) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: AcceptedControls) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: AcceptedControls) {
        self.0 &= !other.0;
    }

    #[cfg(test)]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for AcceptedControls {
    type Output = AcceptedControls;

    fn bitor(self, rhs: Self) -> Self {
        AcceptedControls(self.0 | rhs.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Cannot move service from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: ServiceState,
    pub to: ServiceState,
}

/// Service status as reported to the service manager
///
/// A run moves forward only: Stopped, StartPending, Running, StopPending,
/// Stopped. Steps may be skipped (a failed bring-up goes straight from
/// StartPending to Stopped) but never revisited, and the final Stopped is
/// terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub current_state: ServiceState,
    pub accepted_controls: AcceptedControls,
    pub exit_code: u32,
    finished: bool,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceStatus {
    pub fn new() -> Self {
        Self {
            current_state: ServiceState::Stopped,
            accepted_controls: AcceptedControls::empty(),
            exit_code: 0,
            finished: false,
        }
    }

    /// Position of a state within one run
    fn rank(state: ServiceState, finished: bool) -> u8 {
        match state {
            ServiceState::Stopped if finished => 4,
            ServiceState::Stopped => 0,
            ServiceState::StartPending => 1,
            ServiceState::Running => 2,
            ServiceState::StopPending => 3,
        }
    }

    pub fn transition(&mut self, next: ServiceState) -> Result<(), TransitionError> {
        let current = Self::rank(self.current_state, self.finished);
        let target = Self::rank(next, next == ServiceState::Stopped);

        if self.finished || target <= current {
            return Err(TransitionError {
                from: self.current_state,
                to: next,
            });
        }

        self.current_state = next;
        self.finished = next == ServiceState::Stopped;

        let stop_controls = AcceptedControls::STOP | AcceptedControls::SHUTDOWN;
        if next == ServiceState::Running {
            self.accepted_controls.insert(stop_controls);
        } else {
            self.accepted_controls.remove(stop_controls);
        }

        Ok(())
    }

    /// Whether the terminal Stopped state has been reached
    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
