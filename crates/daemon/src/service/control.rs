//! Service control codes and their mapping to controller actions
//!
//! The mapping is pure so that platform adapters stay thin: they translate
//! whatever the OS delivers into a [`ControlCode`], and the controller
//! applies the resulting [`ControlAction`].

use common::DeviceChange;

/// Payload of a device event control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventType {
    Arrival,
    RemoveComplete,
}

impl From<DeviceChange> for DeviceEventType {
    fn from(change: DeviceChange) -> Self {
        match change {
            DeviceChange::Arrival => DeviceEventType::Arrival,
            DeviceChange::Removal => DeviceEventType::RemoveComplete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    Interrogate,
    Stop,
    Shutdown,
    DeviceEvent(DeviceEventType),
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stop,
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Stop => write!(f, "stop"),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Acknowledge without changing anything
    Acknowledge,
    /// Enter StopPending and stop the event loop
    BeginStop(StopReason),
    /// Forward a device change to the relay
    ForwardDevice(DeviceChange),
    /// Reject the request
    NotImplemented,
}

/// Answer given back to the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    NoError,
    CallNotImplemented,
}

pub fn map_control(code: ControlCode) -> ControlAction {
    match code {
        ControlCode::Interrogate => ControlAction::Acknowledge,
        ControlCode::Stop => ControlAction::BeginStop(StopReason::Stop),
        ControlCode::Shutdown => ControlAction::BeginStop(StopReason::Shutdown),
        ControlCode::DeviceEvent(DeviceEventType::Arrival) => {
            ControlAction::ForwardDevice(DeviceChange::Arrival)
        }
        ControlCode::DeviceEvent(DeviceEventType::RemoveComplete) => {
            ControlAction::ForwardDevice(DeviceChange::Removal)
        }
        ControlCode::Other(_) => ControlAction::NotImplemented,
    }
}
